use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    core::workspace::Workspace,
    error::{Result, SeparationError},
    io::process::{run_command_with_timeout, CommandError},
    types::{SeparationOutputSet, StemFile},
};

/// Pretrained Demucs models accepted when no allowlist is configured.
pub const DEMUCS_MODELS: &[&str] = &[
    "htdemucs",
    "htdemucs_ft",
    "htdemucs_6s",
    "hdemucs_mmi",
    "mdx",
    "mdx_extra",
    "mdx_q",
    "mdx_extra_q",
];

const STEM_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

/// Marker demucs prints when a model name cannot be resolved.
const UNKNOWN_MODEL_MARKER: &str = "neither a single pre-trained model or a bag of models";

/// Boundary to the external separation capability.
pub trait Separator: Send + Sync {
    /// Separates `input` with `model_id`, writing stems under `workspace`.
    fn separate(&self, input: &Path, model_id: &str, workspace: &Workspace)
        -> Result<SeparationOutputSet>;

    /// Verifies the external capability is usable.
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs `python -m demucs.separate` as a child process.
#[derive(Clone, Debug)]
pub struct DemucsSeparator {
    python: String,
    models: Option<Vec<String>>,
    timeout: Option<Duration>,
}

impl Default for DemucsSeparator {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            models: Some(DEMUCS_MODELS.iter().map(|m| m.to_string()).collect()),
            timeout: None,
        }
    }
}

impl DemucsSeparator {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            ..Self::default()
        }
    }

    /// Restricts accepted model ids. `None` accepts anything demucs can load.
    pub fn with_models(mut self, models: Option<Vec<String>>) -> Self {
        self.models = models;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate_model(&self, model_id: &str) -> Result<()> {
        if !is_safe_model_id(model_id) {
            return Err(SeparationError::UnknownModel(model_id.into()));
        }
        if let Some(models) = &self.models {
            if !models.iter().any(|m| m == model_id) {
                return Err(SeparationError::UnknownModel(model_id.into()));
            }
        }
        Ok(())
    }
}

impl Separator for DemucsSeparator {
    fn separate(
        &self,
        input: &Path,
        model_id: &str,
        workspace: &Workspace,
    ) -> Result<SeparationOutputSet> {
        self.validate_model(model_id)?;

        let out_dir = workspace.path().join("separated");
        let args = vec![
            "-m".to_string(),
            "demucs.separate".to_string(),
            "-o".to_string(),
            out_dir.to_string_lossy().into_owned(),
            "-n".to_string(),
            model_id.to_string(),
            input.to_string_lossy().into_owned(),
        ];

        info!(model = model_id, input = %input.display(), "running demucs");
        match run_command_with_timeout(&self.python, &args, Some(workspace.path()), self.timeout) {
            Ok(_) => {}
            Err(CommandError::Failed { stderr, .. }) if stderr.contains(UNKNOWN_MODEL_MARKER) => {
                return Err(SeparationError::UnknownModel(model_id.into()));
            }
            Err(e) => return Err(SeparationError::SeparationExecution(e.to_string())),
        }

        // demucs writes <out>/<model>/<input file stem>/<stem>.<ext>
        let track = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        collect_stems(&out_dir.join(model_id).join(track))
    }

    fn check(&self) -> Result<()> {
        let args = vec![
            "-m".to_string(),
            "demucs.separate".to_string(),
            "--help".to_string(),
        ];
        run_command_with_timeout(&self.python, &args, None, Some(Duration::from_secs(60)))
            .map(|_| ())
            .map_err(|e| SeparationError::SeparationExecution(format!("demucs is not accessible: {e}")))
    }
}

/// Lists the audio files in `dir` as stems named after their file stem,
/// sorted by name.
pub fn collect_stems(dir: &Path) -> Result<SeparationOutputSet> {
    let empty = || SeparationError::EmptyOutput(dir.display().to_string());

    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(empty()),
        Err(e) => return Err(e.into()),
    };

    let mut stems: Vec<StemFile> = Vec::new();
    for entry in entries {
        let path: PathBuf = entry?.path();
        if !path.is_file() || !has_stem_extension(&path) {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(StemFile {
                name: name.to_string(),
                path: path.clone(),
            });
        }
    }

    if stems.is_empty() {
        return Err(empty());
    }
    stems.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(stems = ?stems.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), "collected stems");
    Ok(SeparationOutputSet { stems })
}

fn has_stem_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| STEM_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Model ids end up as a directory name, so only plain identifiers pass.
fn is_safe_model_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
