//! Error types and handling
//!
//! Configuration and lifecycle misuse surface synchronously as
//! [`CollectorError`]. Failures that happen while a session is running are
//! isolated per source and recorded as plain error values that end up in the
//! session report.

use crate::recorder::state::SessionState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned directly to the caller
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source already registered: {0}")]
    DuplicateSource(String),

    #[error("Session already started (state: {0:?})")]
    AlreadyCollecting(SessionState),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CollectorError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            CollectorError::InvalidConfig(_) => "INVALID_CONFIG",
            CollectorError::DuplicateSource(_) => "DUPLICATE_SOURCE",
            CollectorError::AlreadyCollecting(_) => "ALREADY_COLLECTING",
            CollectorError::Io(_) => "IO_ERROR",
            CollectorError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Result type alias using CollectorError
pub type SessionResult<T> = Result<T, CollectorError>;

/// A producer call (or the spool write that follows it) failed for one tick
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("source '{source_id}' failed: {cause}")]
pub struct SourceError {
    pub source_id: String,
    pub cause: String,
}

/// The external encoder could not turn a spool into a video
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("encoding '{source_id}' failed: {stderr}")]
pub struct EncodingError {
    pub source_id: String,
    pub stderr: String,
}

/// A source's buffer could not be written to the container
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("persisting '{source_id}' failed: {cause}")]
pub struct PersistenceError {
    pub source_id: String,
    pub cause: String,
}

/// A worker did not finish before the join deadline
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("worker '{source_id}' did not stop within {waited:?}")]
pub struct ShutdownTimeoutError {
    pub source_id: String,
    pub waited: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CollectorError::DuplicateSource("imu".into()).code(),
            "DUPLICATE_SOURCE"
        );
        assert_eq!(
            CollectorError::AlreadyCollecting(SessionState::Collecting).code(),
            "ALREADY_COLLECTING"
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(CollectorError::from(io).code(), "IO_ERROR");
    }

    #[test]
    fn test_runtime_error_messages() {
        let err = EncodingError {
            source_id: "wrist_cam".into(),
            stderr: "Unknown encoder 'libfoo'".into(),
        };
        assert_eq!(
            err.to_string(),
            "encoding 'wrist_cam' failed: Unknown encoder 'libfoo'"
        );

        let err = ShutdownTimeoutError {
            source_id: "imu".into(),
            waited: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("imu"));
    }
}
