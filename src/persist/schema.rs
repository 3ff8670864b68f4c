//! Container and metadata schema
//!
//! These types define the on-disk layout read by downstream converters.
//! Field names are snake_case on disk.

use crate::source::types::SourceKind;
use crate::utils::json_float;
use crate::video::VideoConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Layout version written into both files
pub const FORMAT_VERSION: &str = "multirate-v1";

/// How the container's samples are organised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
    /// One section per source with every sample it produced
    Raw,
    /// One aggregate table at a common rate
    Synchronized,
}

// =============================================================================
// Container
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub format: String,
    pub session_id: Uuid,
    pub dataset_name: String,
    pub mode: PersistMode,
    pub sources: BTreeMap<String, SourceSection>,
    pub sync: Option<SyncSection>,
    pub videos: BTreeMap<String, VideoSection>,
}

/// Stacked samples of one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    pub kind: SourceKind,
    /// `scalar`, `vector`, `tensor` or `image`
    pub payload: String,
    /// Per-sample shape, identical for every sample
    pub shape: Vec<usize>,
    pub data: ColumnData,
    pub timestamps: Vec<f64>,
}

/// Sample values of one section
///
/// Use the section's `payload` to interpret it: scalars are a flat list,
/// vectors a list of rows, tensors and images a list of raw byte buffers.
/// Non-finite floats are written as `"NaN"`, `"inf"` or `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnData {
    Floats(#[serde(with = "json_float::vec")] Vec<f64>),
    ByteRows(Vec<Vec<u8>>),
    FloatRows(#[serde(with = "json_float::rows")] Vec<Vec<f64>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Floats(v) => v.len(),
            ColumnData::ByteRows(v) => v.len(),
            ColumnData::FloatRows(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Aggregate latest-value-hold table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    pub rate_hz: f64,
    /// Source ids in registration order
    pub columns: Vec<String>,
    pub ticks: Vec<u64>,
    pub timestamps: Vec<f64>,
    /// Per column, one entry per tick; `null` until the source's first sample
    pub data: BTreeMap<String, Vec<Option<serde_json::Value>>>,
}

/// Frames of one spooled image source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSection {
    /// Encoded file name relative to the container, absent if encoding failed
    pub file: Option<String>,
    pub frame_count: u64,
    /// Capture time of every spooled frame
    pub timestamps: Vec<f64>,
}

// =============================================================================
// Metadata sidecar
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub format: String,
    pub session_id: Uuid,
    pub dataset_name: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub mode: PersistMode,
    /// Container file name, absent if it could not be written
    pub container_file: Option<String>,
    pub sources: BTreeMap<String, SourceMetadata>,
    /// Encoder configuration, present when any source was spooled
    pub video: Option<VideoConfig>,
    pub sync_rate_hz: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub kind: SourceKind,
    pub rate_hz: f64,
    pub enabled: bool,
    pub sample_count: u64,
    pub error_count: u64,
    pub spooled: bool,
}
