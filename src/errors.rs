//! Error taxonomy for the clip pipeline.
//!
//! Each variant maps to the narrowest scope that can recover from it:
//! probe failures abort a video, validation failures skip a cut, encoding
//! failures skip a variant (or fall back to the pre-burn-in artifact),
//! credential failures only abort the upload step.

use std::path::PathBuf;
use std::time::Duration;

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Error types for pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Media duration could not be read from the probe tool
    #[error("duration probe failed for {}: {reason}", .path.display())]
    DurationProbe { path: PathBuf, reason: String },

    /// HTTP transport, non-success status, or unparsable response body
    #[error("transport error: {0}")]
    Transport(String),

    /// Cut window does not fit the segment it belongs to
    #[error("invalid cut window '{title}' [{begin}s, {end}s) for a segment of {:.1}s", .duration.as_secs_f64())]
    Validation {
        title: String,
        begin: u32,
        end: u32,
        duration: Duration,
    },

    /// External media tool exited with a non-zero status
    #[error("{tool} failed during {stage}: {detail}")]
    Encoding {
        tool: String,
        stage: String,
        detail: String,
    },

    /// Access credential missing, unreadable or rejected
    #[error("credential error: {0}")]
    Credential(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Video source feed could not be fetched or parsed
    #[error("feed error: {0}")]
    Feed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Short stage label used in failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DurationProbe { .. } => "probe",
            PipelineError::Transport(_) => "transport",
            PipelineError::Validation { .. } => "validation",
            PipelineError::Encoding { .. } => "encoding",
            PipelineError::Credential(_) => "credential",
            PipelineError::Config(_) => "config",
            PipelineError::Feed(_) => "feed",
            PipelineError::Io(_) => "io",
        }
    }

    /// Whether the error aborts the whole video rather than a single item
    pub fn is_fatal_for_video(&self) -> bool {
        matches!(self, PipelineError::DurationProbe { .. })
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
