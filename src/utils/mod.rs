//! Shared utilities

pub mod error;
pub mod json_float;

pub use error::{
    CollectorError, EncodingError, PersistenceError, SessionResult, ShutdownTimeoutError,
    SourceError,
};

/// Current wall-clock time as fractional seconds since the Unix epoch
pub fn unix_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}
