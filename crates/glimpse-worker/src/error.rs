//! Worker error types.
//!
//! Every error is scoped to one source, one cycle or one file; none of them is
//! fatal to the process. [`WorkerError::kind`] folds each variant into one of
//! four handling classes.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How a failure is handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or unreadable file, timed out call: skip the step, keep state.
    TransientIo,
    /// The captioning service is throttling: trip the shared cooldown.
    RateLimited,
    /// Malformed source: skip that one job, schedule the rest.
    ConfigurationInvalid,
    /// Encoded duration differs from the expected one: concatenate anyway.
    EncodeMismatch,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::EncodeMismatch => "encode_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Unknown source: {0}")]
    SourceNotFound(String),

    #[error("Encoded {actual:.2}s, expected {expected:.2}s")]
    EncodeMismatch { expected: f64, actual: f64 },

    #[error("Media error: {0}")]
    Media(#[from] glimpse_media::MediaError),

    #[error("Model error: {0}")]
    Model(#[from] glimpse_models::ModelError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn transient_io(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn configuration_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    pub fn timeout(operation: &'static str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            secs: timeout.as_secs(),
        }
    }

    /// Handling class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::RateLimited(_) => ErrorKind::RateLimited,
            WorkerError::ConfigurationInvalid(_)
            | WorkerError::SourceNotFound(_)
            | WorkerError::Model(_) => ErrorKind::ConfigurationInvalid,
            WorkerError::EncodeMismatch { .. } => ErrorKind::EncodeMismatch,
            WorkerError::TransientIo(_)
            | WorkerError::Timeout { .. }
            | WorkerError::Media(_)
            | WorkerError::Http(_)
            | WorkerError::Json(_)
            | WorkerError::Io(_) => ErrorKind::TransientIo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            WorkerError::timeout("capture", Duration::from_secs(10)).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            WorkerError::from(glimpse_media::MediaError::Timeout(5)).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            WorkerError::rate_limited("429").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            WorkerError::from(glimpse_models::ModelError::InvalidName("-x".into())).kind(),
            ErrorKind::ConfigurationInvalid
        );
        assert_eq!(
            WorkerError::EncodeMismatch {
                expected: 10.0,
                actual: 9.0
            }
            .kind(),
            ErrorKind::EncodeMismatch
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = WorkerError::timeout("caption", Duration::from_secs(60));
        assert_eq!(err.to_string(), "caption timed out after 60s");
    }
}
