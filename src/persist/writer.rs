//! Container and metadata writer
//!
//! Everything a stopped session collected is written as two pretty-printed
//! JSON files in the output directory:
//! - data_<unix seconds>_<session>.json: sample container
//! - metadata_<unix seconds>_<session>.json: session description
//!
//! `<session>` is the first eight hex digits of the session id, so sessions
//! stopping in the same second do not overwrite each other.
//!
//! Each section is checked on its own. A source whose samples cannot be
//! stacked is skipped and reported, the rest is still written.

use super::schema::{
    ColumnData, Container, Metadata, PersistMode, SourceMetadata, SourceSection, SyncSection,
    VideoSection, FORMAT_VERSION,
};
use crate::recorder::state::SourceStats;
use crate::source::types::{Payload, Sample, SourceKind};
use crate::sync::SyncTable;
use crate::utils::error::{PersistenceError, SessionResult};
use crate::utils::json_float;
use crate::video::VideoConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Drained samples of one buffered source
#[derive(Debug, Clone)]
pub struct BufferedSource {
    pub source_id: String,
    pub kind: SourceKind,
    pub samples: Vec<Arc<Sample>>,
}

/// Frames of one spooled source after encoding
#[derive(Debug, Clone)]
pub struct SpooledVideo {
    pub source_id: String,
    /// Encoded file name, `None` if encoding failed or nothing was spooled
    pub file: Option<String>,
    pub frame_count: u64,
    pub timestamps: Vec<f64>,
}

/// Everything a stopped session hands to the writer
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub dataset_name: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub sources: Vec<SourceStats>,
    pub buffers: Vec<BufferedSource>,
    pub sync: Option<SyncTable>,
    pub videos: Vec<SpooledVideo>,
    pub video_config: Option<VideoConfig>,
}

impl SessionRecord {
    pub fn mode(&self) -> PersistMode {
        if self.sync.is_some() {
            PersistMode::Synchronized
        } else {
            PersistMode::Raw
        }
    }
}

/// Files written and sections skipped
#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub container_path: PathBuf,
    pub metadata_path: PathBuf,
    pub errors: Vec<PersistenceError>,
}

pub struct PersistenceWriter {
    output_dir: PathBuf,
}

impl PersistenceWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn container_path(&self, record: &SessionRecord) -> PathBuf {
        self.output_dir
            .join(format!("data_{}.json", file_suffix(record)))
    }

    pub fn metadata_path(&self, record: &SessionRecord) -> PathBuf {
        self.output_dir
            .join(format!("metadata_{}.json", file_suffix(record)))
    }

    /// Write the container and the metadata sidecar
    ///
    /// Per-source failures are returned in the outcome; only a failure to
    /// write either file as a whole is an error.
    pub fn write(&self, record: &SessionRecord) -> SessionResult<PersistOutcome> {
        fs::create_dir_all(&self.output_dir)?;

        let (container, errors) = build_container(record);
        for error in &errors {
            tracing::warn!("{}", error);
        }

        let container_path = self.container_path(record);
        let content = serde_json::to_string_pretty(&container)?;
        fs::write(&container_path, content)?;

        let container_file = container_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let metadata = build_metadata(record, container_file);
        let metadata_path = self.metadata_path(record);
        let content = serde_json::to_string_pretty(&metadata)?;
        fs::write(&metadata_path, content)?;

        tracing::info!(
            "Saved {} source sections{} to {:?}",
            container.sources.len(),
            if container.sync.is_some() {
                " and sync table"
            } else {
                ""
            },
            container_path
        );

        Ok(PersistOutcome {
            container_path,
            metadata_path,
            errors,
        })
    }
}

/// `<unix seconds>_<first 8 hex digits of the session id>`
fn file_suffix(record: &SessionRecord) -> String {
    let id = record.session_id.simple().to_string();
    format!("{}_{}", record.stopped_at.timestamp(), &id[..8])
}

/// Read a container written by [`PersistenceWriter::write`]
pub fn read_container(path: &Path) -> SessionResult<Container> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read a metadata sidecar written by [`PersistenceWriter::write`]
pub fn read_metadata(path: &Path) -> SessionResult<Metadata> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Assemble the container, collecting one error per skipped section
pub fn build_container(record: &SessionRecord) -> (Container, Vec<PersistenceError>) {
    let mut errors = Vec::new();

    let mut sources = BTreeMap::new();
    for buffer in &record.buffers {
        match stack_section(buffer) {
            Ok(Some(section)) => {
                sources.insert(buffer.source_id.clone(), section);
            }
            Ok(None) => {
                tracing::debug!("'{}' has no samples, omitted", buffer.source_id);
            }
            Err(cause) => errors.push(PersistenceError {
                source_id: buffer.source_id.clone(),
                cause,
            }),
        }
    }

    let sync = record
        .sync
        .as_ref()
        .map(|table| build_sync_section(table, &mut errors));

    let videos = record
        .videos
        .iter()
        .map(|v| {
            (
                v.source_id.clone(),
                VideoSection {
                    file: v.file.clone(),
                    frame_count: v.frame_count,
                    timestamps: v.timestamps.clone(),
                },
            )
        })
        .collect();

    let container = Container {
        format: FORMAT_VERSION.to_string(),
        session_id: record.session_id,
        dataset_name: record.dataset_name.clone(),
        mode: record.mode(),
        sources,
        sync,
        videos,
    };
    (container, errors)
}

fn build_metadata(record: &SessionRecord, container_file: Option<String>) -> Metadata {
    let sources = record
        .sources
        .iter()
        .map(|s| {
            (
                s.source_id.clone(),
                SourceMetadata {
                    kind: s.kind,
                    rate_hz: s.rate_hz,
                    enabled: s.enabled,
                    sample_count: s.samples,
                    error_count: s.errors,
                    spooled: s.spooled,
                },
            )
        })
        .collect();

    let duration_secs = (record.stopped_at - record.started_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    Metadata {
        format: FORMAT_VERSION.to_string(),
        session_id: record.session_id,
        dataset_name: record.dataset_name.clone(),
        started_at: record.started_at,
        stopped_at: record.stopped_at,
        duration_secs,
        mode: record.mode(),
        container_file,
        sources,
        video: if record.videos.is_empty() {
            None
        } else {
            record.video_config.clone()
        },
        sync_rate_hz: record.sync.as_ref().map(|t| t.rate_hz),
    }
}

/// Check that every payload has the first payload's variant and shape
fn check_homogeneous<'a>(
    payloads: impl IntoIterator<Item = &'a Payload>,
) -> Result<Option<(&'static str, Vec<usize>)>, String> {
    let mut payloads = payloads.into_iter();
    let Some(first) = payloads.next() else {
        return Ok(None);
    };
    let expected = (first.type_name(), first.shape());
    for (i, payload) in payloads.enumerate() {
        let actual = (payload.type_name(), payload.shape());
        if actual != expected {
            return Err(format!(
                "heterogeneous samples: #{} is {} {:?}, expected {} {:?}",
                i + 1,
                actual.0,
                actual.1,
                expected.0,
                expected.1
            ));
        }
    }
    Ok(Some(expected))
}

fn stack_section(buffer: &BufferedSource) -> Result<Option<SourceSection>, String> {
    let samples = &buffer.samples;
    let Some((payload, shape)) = check_homogeneous(samples.iter().map(|s| &s.payload))? else {
        return Ok(None);
    };

    let data = match payload {
        "scalar" => ColumnData::Floats(
            samples
                .iter()
                .filter_map(|s| match s.payload {
                    Payload::Scalar(v) => Some(v),
                    _ => None,
                })
                .collect(),
        ),
        "vector" => ColumnData::FloatRows(
            samples
                .iter()
                .filter_map(|s| match &s.payload {
                    Payload::Vector(v) => Some(v.clone()),
                    _ => None,
                })
                .collect(),
        ),
        _ => ColumnData::ByteRows(
            samples
                .iter()
                .filter_map(|s| match &s.payload {
                    Payload::Tensor { data, .. } | Payload::ImageFrame { data, .. } => {
                        Some(data.clone())
                    }
                    _ => None,
                })
                .collect(),
        ),
    };

    Ok(Some(SourceSection {
        kind: buffer.kind,
        payload: payload.to_string(),
        shape,
        data,
        timestamps: samples.iter().map(|s| s.timestamp).collect(),
    }))
}

fn payload_value(payload: &Payload) -> serde_json::Value {
    match payload {
        Payload::Scalar(v) => json_float::to_value(*v),
        Payload::Vector(v) => v.iter().map(|x| json_float::to_value(*x)).collect(),
        Payload::Tensor { data, .. } | Payload::ImageFrame { data, .. } => serde_json::json!(data),
    }
}

fn build_sync_section(table: &SyncTable, errors: &mut Vec<PersistenceError>) -> SyncSection {
    let mut columns = Vec::new();
    let mut data = BTreeMap::new();

    for column in table.columns() {
        let values = table.column(column);
        if let Err(cause) = check_homogeneous(values.iter().flatten().map(|s| &s.payload)) {
            errors.push(PersistenceError {
                source_id: column.clone(),
                cause,
            });
            continue;
        }
        columns.push(column.clone());
        data.insert(
            column.clone(),
            values
                .into_iter()
                .map(|v| v.map(|s| payload_value(&s.payload)))
                .collect(),
        );
    }

    SyncSection {
        rate_hz: table.rate_hz,
        columns,
        ticks: table.frames().iter().map(|f| f.tick).collect(),
        timestamps: table.frames().iter().map(|f| f.timestamp).collect(),
        data,
    }
}
