use std::time::Duration;

use thiserror::Error;

/// Central error type for the stem-splitter-server crate.
#[derive(Debug, Error)]
pub enum SeparationError {
    // Client errors
    #[error("invalid audio payload: {0}")]
    Decoding(String),

    #[error("stem `{stem}` was not produced by the model (available: {})", available.join(", "))]
    UnknownStem { stem: String, available: Vec<String> },

    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("audio payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("audio is {seconds:.1}s long, limit is {limit}s")]
    InputTooLong { seconds: f64, limit: u64 },

    // Server errors
    #[error("workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("separation failed: {0}")]
    SeparationExecution(String),

    #[error("separation produced no stem files in {0}")]
    EmptyOutput(String),

    #[error("stem formats disagree: {0}")]
    FormatMismatch(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl SeparationError {
    /// HTTP status the pipeline boundary maps this error to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Decoding(_) | Self::UnknownStem { .. } | Self::UnknownModel(_) => 400,
            Self::PayloadTooLarge { .. } | Self::InputTooLong { .. } => 413,
            Self::TimedOut(_) => 504,
            _ => 500,
        }
    }

    /// Stable machine-readable code carried in error bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Decoding(_) => "decoding_error",
            Self::UnknownStem { .. } => "unknown_stem",
            Self::UnknownModel(_) => "unknown_model",
            Self::PayloadTooLarge { .. } | Self::InputTooLong { .. } => "payload_too_large",
            Self::Workspace(_) => "workspace_error",
            Self::SeparationExecution(_) => "separation_failed",
            Self::EmptyOutput(_) => "empty_output",
            Self::FormatMismatch(_) => "format_mismatch",
            Self::Encoding(_) => "encoding_error",
            Self::TimedOut(_) => "timed_out",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        let status = self.status_code();
        status >= 400 && status < 500
    }
}

impl From<hound::Error> for SeparationError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => SeparationError::Io(io),
            other => SeparationError::Encoding(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SeparationError>;
