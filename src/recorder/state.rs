//! Session state management
//!
//! Defines the session state machine, its configuration and what a finished
//! session reports back.

use crate::buffer::StoreKind;
use crate::source::types::{period_for, SourceKind};
use crate::utils::error::{
    EncodingError, PersistenceError, ShutdownTimeoutError, SourceError,
};
use crate::video::{VideoArtifact, VideoConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Default bound on how long stop waits for workers
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 3000;

/// Current state of a collection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, not started
    #[default]
    Idle,
    /// Workers are polling
    Collecting,
    /// Stop in progress
    Stopping,
    /// Data persisted; terminal
    Saved,
}

/// Synchronized-mode settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Common tick rate of the aggregate table
    pub rate_hz: f64,
}

/// Configuration for one collection session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Directory for the container, metadata sidecar and videos
    pub output_dir: PathBuf,

    /// Free-form dataset name recorded in the metadata
    pub dataset_name: String,

    /// How long stop waits for workers, shared across all of them
    pub join_timeout_ms: u64,

    /// Where image spools and spill files live (defaults to `output_dir`)
    pub spool_dir: Option<PathBuf>,

    /// Buffer backing store in raw mode
    pub store: StoreKind,

    /// Enables synchronized mode
    pub sync: Option<SyncConfig>,

    /// Image spooling and encoding
    pub video: VideoConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            dataset_name: "dataset".to_string(),
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            spool_dir: None,
            store: StoreKind::Memory,
            sync: None,
            video: VideoConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn spool_root(&self) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.clone())
    }

    pub fn is_synchronized(&self) -> bool {
        self.sync.is_some()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.output_dir.as_os_str().is_empty() {
            return Err("output directory must not be empty".to_string());
        }
        if let Some(sync) = &self.sync {
            if period_for(sync.rate_hz).is_none() {
                return Err(format!(
                    "sync rate must be a positive number of Hz with a representable period, got {}",
                    sync.rate_hz
                ));
            }
        }
        if self.video.enabled {
            self.video.validate()?;
        }
        Ok(())
    }
}

/// Events emitted during a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Workers are running
    Started { session_id: Uuid },
    /// Stop requested
    Stopping,
    /// A spool was encoded into a video
    VideoEncoded(VideoArtifact),
    /// Everything persisted
    Saved { container_path: Option<PathBuf> },
}

/// Live statistics for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub source_id: String,
    pub kind: SourceKind,
    pub rate_hz: f64,
    pub enabled: bool,
    /// Samples buffered or frames spooled
    pub samples: u64,
    /// Failed producer calls
    pub errors: u64,
    pub last_error: Option<SourceError>,
    /// Frames go to an image spool instead of a buffer
    pub spooled: bool,
}

/// Outcome of a stopped session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,

    /// Structured container, if it could be written
    pub container_path: Option<PathBuf>,

    /// Metadata sidecar, if it could be written
    pub metadata_path: Option<PathBuf>,

    pub sources: Vec<SourceStats>,
    pub videos: Vec<VideoArtifact>,

    /// Ticks in the aggregate table (synchronized mode only)
    pub sync_ticks: Option<u64>,

    pub encoding_errors: Vec<EncodingError>,
    pub persistence_errors: Vec<PersistenceError>,
    pub shutdown_timeouts: Vec<ShutdownTimeoutError>,
}

impl SessionReport {
    pub fn duration(&self) -> Duration {
        (self.stopped_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceStats> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Total failed producer calls across all sources
    pub fn source_error_count(&self) -> u64 {
        self.sources.iter().map(|s| s.errors).sum()
    }
}
