//! Service configuration.
//!
//! Defaults are overridden by `STEM_SPLITTER_*` environment variables, which
//! are in turn overridden by command-line flags in the binary.

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        encoder::OutputPolicy,
        pipeline::{InputLimits, Pipeline},
        separator::{DemucsSeparator, DEMUCS_MODELS},
        workspace::WorkspaceManager,
    },
    error::{Result, SeparationError},
};

const ENV_PREFIX: &str = "STEM_SPLITTER_";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub listen_addr: String,
    /// Root under which per-request workspaces are created.
    pub tmp_dir: PathBuf,
    /// Interpreter that has `demucs` installed.
    pub python: String,
    /// Accepted model ids; `None` lets demucs decide.
    pub models: Option<Vec<String>>,
    pub separation_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_input_bytes: usize,
    pub max_input_seconds: Option<u64>,
    pub output: OutputPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".into(),
            tmp_dir: env::temp_dir().join("stem-splitter"),
            python: "python3".into(),
            models: Some(DEMUCS_MODELS.iter().map(|m| m.to_string()).collect()),
            separation_timeout_secs: Some(900),
            request_timeout_secs: Some(1200),
            max_input_bytes: 50 * 1024 * 1024,
            max_input_seconds: Some(900),
            output: OutputPolicy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup (keys include the
    /// `STEM_SPLITTER_` prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(v) = get("LISTEN_ADDR") {
            cfg.listen_addr = v;
        }
        if let Some(v) = get("TMP_DIR") {
            cfg.tmp_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PYTHON") {
            cfg.python = v;
        }
        // Set-but-empty disables the allowlist.
        if let Some(v) = lookup(&format!("{ENV_PREFIX}MODELS")) {
            cfg.models = parse_models(&v);
        }
        if let Some(v) = get("SEPARATION_TIMEOUT_SECS") {
            cfg.separation_timeout_secs = optional_secs("SEPARATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = optional_secs("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("MAX_INPUT_BYTES") {
            cfg.max_input_bytes = parse("MAX_INPUT_BYTES", &v)?;
        }
        if let Some(v) = get("MAX_INPUT_SECONDS") {
            cfg.max_input_seconds = optional_secs("MAX_INPUT_SECONDS", &v)?;
        }
        if let Some(v) = get("MP3_BITRATE") {
            cfg.output.bitrate_kbps = parse("MP3_BITRATE", &v)?;
        }
        if let Some(v) = get("OUTPUT_SAMPLE_RATE") {
            cfg.output.sample_rate = parse("OUTPUT_SAMPLE_RATE", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_input_bytes == 0 {
            return Err(SeparationError::Config("max_input_bytes must be positive".into()));
        }
        if !(8_000..=48_000).contains(&self.output.sample_rate) {
            return Err(SeparationError::Config(format!(
                "output sample rate {} is not an MP3 rate",
                self.output.sample_rate
            )));
        }
        if self.python.trim().is_empty() {
            return Err(SeparationError::Config("python must not be empty".into()));
        }
        Ok(())
    }

    /// Largest request body accepted: base64 of `max_input_bytes` plus room
    /// for the JSON envelope.
    pub fn max_body_bytes(&self) -> usize {
        self.max_input_bytes.div_ceil(3) * 4 + 64 * 1024
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn input_limits(&self) -> InputLimits {
        InputLimits {
            max_bytes: self.max_input_bytes,
            max_seconds: self.max_input_seconds,
        }
    }

    pub fn separator(&self) -> DemucsSeparator {
        DemucsSeparator::new(self.python.clone())
            .with_models(self.models.clone())
            .with_timeout(self.separation_timeout_secs.map(Duration::from_secs))
    }

    /// Pipeline backed by the Demucs separator.
    pub fn build_pipeline(&self) -> Pipeline {
        Pipeline::new(
            WorkspaceManager::new(self.tmp_dir.clone()),
            Box::new(self.separator()),
            self.output.clone(),
            self.input_limits(),
        )
    }
}

fn parse_models(raw: &str) -> Option<Vec<String>> {
    let models: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if models.is_empty() {
        None
    } else {
        Some(models)
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| SeparationError::Config(format!("{ENV_PREFIX}{name}={raw:?}: {e}")))
}

/// `0` disables the limit.
fn optional_secs(name: &str, raw: &str) -> Result<Option<u64>> {
    let secs: u64 = parse(name, raw)?;
    Ok((secs > 0).then_some(secs))
}
