// src/error.rs

use std::path::PathBuf;

/// Error type for the whole job pipeline.
///
/// The orchestrator splits this into retryable (transient I/O, storage,
/// decode hiccups) and non-retryable (bad input, missing detector, privacy
/// violation) via [`PipelineError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Upload is neither an accepted video type nor an archive that yields
    /// usable clips.
    #[error("unsupported upload format: {0}")]
    UnsupportedFormat(String),

    /// An export payload contained an identifier-like key. Never retried.
    #[error("privacy validation failed for {stage}: key '{key}' matches an identifier pattern")]
    PrivacyValidation { stage: String, key: String },

    /// The detection/tracking capability is absent or broke. The job must
    /// fail rather than proceed with empty detections.
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// A clip could not be probed or decoded at all.
    #[error("clip '{clip_id}' is unreadable: {reason}")]
    UnreadableVideo { clip_id: String, reason: String },

    /// ffmpeg/ffprobe exited non-zero.
    #[error("transcode failed (exit code {exit_code:?}): {stderr}")]
    Transcode {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffmpeg/ffprobe binary not found: {0}")]
    FfmpegNotFound(std::io::Error),

    #[error("blob store operation '{op}' failed for key '{key}': {reason}")]
    Storage {
        op: &'static str,
        key: String,
        reason: String,
    },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("working file {path}: {source}")]
    WorkingFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("export serialization failed: {0}")]
    Export(String),
}

impl PipelineError {
    /// Transient failures are retried with backoff; fatal-input,
    /// fatal-model and fatal-privacy failures abort the job immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::UnsupportedFormat(_)
                | PipelineError::PrivacyValidation { .. }
                | PipelineError::DetectorUnavailable(_)
                | PipelineError::UnreadableVideo { .. }
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Export(err.to_string())
    }
}
