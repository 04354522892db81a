//! Request orchestration: decode, stage, separate, assemble, encode.
//!
//! A request moves through
//! `Received → Validated → Staged → Separated → Assembled → Encoded → Responded`
//! and drops into `Errored` from any stage. The workspace is acquired when
//! staging starts and released exactly once on every exit path.

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::{
    core::{
        audio::{load_and_mix, probe_audio, read_audio, write_to_workspace, AudioProbe},
        encoder::{encode_to_container, OutputPolicy},
        separator::Separator,
        workspace::{Workspace, WorkspaceManager},
    },
    error::{Result, SeparationError},
    io::transport,
    types::{
        SeparatedTracks, SeparationRequest, SeparationResult, DEFAULT_MODEL, DEFAULT_TARGET_STEM,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Staged,
    Separated,
    Assembled,
    Encoded,
    Responded,
    Errored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Staged => "staged",
            Stage::Separated => "separated",
            Stage::Assembled => "assembled",
            Stage::Encoded => "encoded",
            Stage::Responded => "responded",
            Stage::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Ceilings applied to uploads before any workspace is created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputLimits {
    pub max_bytes: usize,
    /// Enforced only when the container reports its length.
    pub max_seconds: Option<u64>,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            max_seconds: Some(900),
        }
    }
}

/// Decoded, checked upload ready for staging.
#[derive(Debug)]
pub struct ValidatedRequest {
    pub audio: Vec<u8>,
    pub probe: AudioProbe,
    pub target_stem: String,
    pub model: String,
}

pub struct Pipeline {
    workspaces: WorkspaceManager,
    separator: Box<dyn Separator>,
    policy: OutputPolicy,
    limits: InputLimits,
}

impl Pipeline {
    pub fn new(
        workspaces: WorkspaceManager,
        separator: Box<dyn Separator>,
        policy: OutputPolicy,
        limits: InputLimits,
    ) -> Self {
        Self {
            workspaces,
            separator,
            policy,
            limits,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn policy(&self) -> &OutputPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &InputLimits {
        &self.limits
    }

    pub fn check(&self) -> Result<()> {
        self.separator.check()
    }

    /// Runs one request to completion. Either every field of the result is
    /// populated or an error is returned.
    pub fn process(&self, request: SeparationRequest) -> Result<SeparationResult> {
        let span = info_span!(
            "separation",
            stem = %request.target_stem,
            model = %request.model
        );
        let _enter = span.enter();
        let started = Instant::now();
        debug!(stage = %Stage::Received, "request received");

        let outcome = self.validate(request).and_then(|valid| {
            let tracks = self.separate_bytes(&valid)?;
            Ok(SeparationResult {
                vocal_audio: transport::encode(&tracks.target),
                bg_audio: transport::encode(&tracks.background),
                target_stem: valid.target_stem,
                content_type: self.policy.content_type().to_string(),
            })
        });

        match &outcome {
            Ok(_) => info!(
                stage = %Stage::Responded,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "separation complete"
            ),
            Err(e) => warn!(
                stage = %Stage::Errored,
                code = e.code(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "separation failed"
            ),
        }
        outcome
    }

    /// Received → Validated. Nothing touches the disk here.
    pub fn validate(&self, request: SeparationRequest) -> Result<ValidatedRequest> {
        let text = request
            .audio_content
            .ok_or_else(|| SeparationError::Decoding("audio_content is required".into()))?;
        let audio = transport::decode(&text)?;

        if audio.len() > self.limits.max_bytes {
            return Err(SeparationError::PayloadTooLarge {
                size: audio.len(),
                limit: self.limits.max_bytes,
            });
        }

        let probe = probe_audio(&audio)?;
        if let (Some(limit), Some(seconds)) = (self.limits.max_seconds, probe.duration_secs()) {
            if seconds > limit as f64 {
                return Err(SeparationError::InputTooLong { seconds, limit });
            }
        }

        let target_stem = non_empty_or(request.target_stem, DEFAULT_TARGET_STEM);
        let model = non_empty_or(request.model, DEFAULT_MODEL);
        debug!(
            stage = %Stage::Validated,
            bytes = audio.len(),
            format = probe.extension,
            "input validated"
        );

        Ok(ValidatedRequest {
            audio,
            probe,
            target_stem,
            model,
        })
    }

    /// Validated → Encoded inside a workspace that is released before
    /// returning, whatever the outcome.
    pub fn separate_bytes(&self, request: &ValidatedRequest) -> Result<SeparatedTracks> {
        let mut workspace = self.workspaces.acquire()?;
        let outcome = self.run_in_workspace(request, &workspace);
        if let Err(e) = workspace.release() {
            warn!(workspace = %workspace.path().display(), error = %e, "failed to remove workspace");
        }
        outcome
    }

    fn run_in_workspace(
        &self,
        request: &ValidatedRequest,
        workspace: &Workspace,
    ) -> Result<SeparatedTracks> {
        let filename = format!("input.{}", request.probe.extension);
        let input = write_to_workspace(&request.audio, workspace, &filename)?;
        debug!(stage = %Stage::Staged, input = %input.display(), "input staged");

        let outputs = self.separator.separate(&input, &request.model, workspace)?;
        debug!(stage = %Stage::Separated, stems = ?outputs.names(), "model finished");

        let (target, rest) = outputs.split_target(&request.target_stem).ok_or_else(|| {
            SeparationError::UnknownStem {
                stem: request.target_stem.clone(),
                available: outputs.names(),
            }
        })?;
        let target_audio = read_audio(&target.path)?;
        let background = if rest.is_empty() {
            // A model that only emits the target leaves nothing behind.
            target_audio.silence_like()
        } else {
            let paths: Vec<_> = rest.iter().map(|s| s.path.as_path()).collect();
            load_and_mix(&paths)?
        };
        debug!(
            stage = %Stage::Assembled,
            target_secs = target_audio.duration_secs(),
            background_secs = background.duration_secs(),
            mixed = rest.len(),
            "tracks assembled"
        );

        let tracks = SeparatedTracks {
            target: encode_to_container(&target_audio, &self.policy)?,
            background: encode_to_container(&background, &self.policy)?,
        };
        debug!(
            stage = %Stage::Encoded,
            target_bytes = tracks.target.len(),
            background_bytes = tracks.background.len(),
            "tracks encoded"
        );
        Ok(tracks)
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}
