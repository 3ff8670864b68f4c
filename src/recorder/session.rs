//! Session lifecycle
//!
//! A [`Session`] owns one registry and runs it through
//! `Idle → Collecting → Stopping → Saved`. Starting spawns one polling thread
//! per enabled source (plus the synchronizer in synchronized mode); stopping
//! cancels them, waits a bounded time, seals every buffer and spool, encodes
//! the spools and writes the container.

use super::cancel::CancelToken;
use super::state::{SessionConfig, SessionEvent, SessionReport, SessionState, SourceStats};
use super::worker::{
    spawn_synchronizer, spawn_worker, SampleSink, SharedTable, SourceCounters, WorkerHandle,
};
use crate::buffer::{LatestOnlyStore, MemoryStore, SampleStore, SourceBuffer, SpillStore, StoreKind};
use crate::persist::{BufferedSource, PersistenceWriter, SessionRecord, SpooledVideo};
use crate::source::registry::SourceRegistry;
use crate::source::types::Source;
use crate::sync::{LatestValueJoin, SyncTable};
use crate::utils::error::{CollectorError, PersistenceError, SessionResult};
use crate::video::{encode_spool, FfmpegEncoder, FrameEncoder, FrameSpool};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything that only exists while collecting
struct ActiveRun {
    started_at: DateTime<Utc>,
    workers: Vec<WorkerHandle>,
    synchronizer: Option<WorkerHandle>,
    buffers: Vec<(Source, Arc<SourceBuffer>)>,
    spools: Vec<Arc<FrameSpool>>,
    sync_table: Option<SharedTable>,
}

/// One bounded collection session
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    registry: Mutex<SourceRegistry>,
    state: RwLock<SessionState>,
    cancel: CancelToken,
    encoder: Arc<dyn FrameEncoder>,
    counters: RwLock<HashMap<String, Arc<SourceCounters>>>,
    active: Mutex<Option<ActiveRun>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session that encodes spools with FFmpeg
    pub fn new(registry: SourceRegistry, config: SessionConfig) -> SessionResult<Self> {
        let encoder = Arc::new(FfmpegEncoder::new(config.video.clone()));
        Self::with_encoder(registry, config, encoder)
    }

    /// Create a session with a custom spool encoder
    pub fn with_encoder(
        registry: SourceRegistry,
        config: SessionConfig,
        encoder: Arc<dyn FrameEncoder>,
    ) -> SessionResult<Self> {
        config.validate().map_err(CollectorError::InvalidConfig)?;

        let (event_tx, _) = broadcast::channel(100);
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            registry: Mutex::new(registry),
            state: RwLock::new(SessionState::Idle),
            cancel: CancelToken::new(),
            encoder,
            counters: RwLock::new(HashMap::new()),
            active: Mutex::new(None),
            event_tx,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Snapshot of the registered sources, in registration order
    ///
    /// The registry itself is fixed once the session is created.
    pub fn registry(&self) -> Vec<Source> {
        self.registry.lock().list_sources()
    }

    /// Cancellation token shared with the workers
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Live per-source counters, in registration order
    pub fn stats(&self) -> Vec<SourceStats> {
        let counters = self.counters.read();
        let sources = self.registry.lock().list_sources();
        sources
            .into_iter()
            .map(|source| {
                let c = counters.get(&source.id);
                SourceStats {
                    spooled: source.enabled && self.is_spooled(&source),
                    samples: c.map(|c| c.samples()).unwrap_or(0),
                    errors: c.map(|c| c.errors()).unwrap_or(0),
                    last_error: c.and_then(|c| c.last_error()),
                    source_id: source.id,
                    kind: source.kind,
                    rate_hz: source.rate_hz,
                    enabled: source.enabled,
                }
            })
            .collect()
    }

    /// Begin collecting
    pub fn start(&self) -> SessionResult<()> {
        let mut state = self.state.write();
        if *state != SessionState::Idle {
            return Err(CollectorError::AlreadyCollecting(*state));
        }

        tracing::info!(
            "Starting session {} ('{}') to {:?}",
            self.id,
            self.config.dataset_name,
            self.config.output_dir
        );

        std::fs::create_dir_all(&self.config.output_dir)?;
        let spool_root = self.config.spool_root();
        std::fs::create_dir_all(&spool_root)?;

        // Sinks first: a failure here leaves the registry untouched
        let producers = {
            let mut registry = self.registry.lock();
            let sinks = registry
                .list_sources()
                .into_iter()
                .filter(|s| s.enabled)
                .map(|s| self.create_sink(&s, &spool_root))
                .collect::<io::Result<Vec<_>>>()?;
            registry
                .take_enabled_producers()
                .into_iter()
                .zip(sinks)
                .collect::<Vec<_>>()
        };

        let started_at = Utc::now();
        let mut workers = Vec::new();
        let mut buffers = Vec::new();
        let mut spools = Vec::new();
        let mut counters = HashMap::new();

        for ((source, producer), sink) in producers {
            match &sink {
                SampleSink::Buffer(buffer) => buffers.push((source.clone(), Arc::clone(buffer))),
                SampleSink::Spool(spool) => spools.push(Arc::clone(spool)),
            }
            let source_counters = Arc::new(SourceCounters::default());
            counters.insert(source.id.clone(), Arc::clone(&source_counters));

            match spawn_worker(source, producer, sink, source_counters, self.cancel.clone()) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    tracing::error!("Failed to spawn worker: {}", e);
                    self.cancel.cancel();
                    *state = SessionState::Saved;
                    return Err(e.into());
                }
            }
        }

        let mut synchronizer = None;
        let mut sync_table = None;
        if let Some(sync) = &self.config.sync {
            let join = LatestValueJoin::new(buffers.iter().map(|(_, b)| Arc::clone(b)).collect());
            let table: SharedTable = Arc::new(Mutex::new(Some(SyncTable::new(
                sync.rate_hz,
                join.columns().to_vec(),
            ))));
            match spawn_synchronizer(join, Arc::clone(&table), sync.rate_hz, self.cancel.clone()) {
                Ok(handle) => synchronizer = Some(handle),
                Err(e) => {
                    tracing::error!("Failed to spawn synchronizer: {}", e);
                    self.cancel.cancel();
                    *state = SessionState::Saved;
                    return Err(e.into());
                }
            }
            sync_table = Some(table);
        }

        tracing::info!(
            "Collecting from {} sources ({} buffered, {} spooled){}",
            workers.len(),
            buffers.len(),
            spools.len(),
            match &self.config.sync {
                Some(sync) => format!(", synchronized at {} Hz", sync.rate_hz),
                None => String::new(),
            }
        );

        *self.counters.write() = counters;
        *self.active.lock() = Some(ActiveRun {
            started_at,
            workers,
            synchronizer,
            buffers,
            spools,
            sync_table,
        });
        *state = SessionState::Collecting;
        drop(state);

        let _ = self.event_tx.send(SessionEvent::Started {
            session_id: self.id,
        });
        Ok(())
    }

    /// Stop collecting and persist everything
    ///
    /// Only the first call after `start()` does any work; every other call
    /// returns `Ok(None)`.
    pub async fn stop(&self) -> SessionResult<Option<SessionReport>> {
        let run = {
            let mut state = self.state.write();
            if *state != SessionState::Collecting {
                tracing::debug!("stop() ignored in state {:?}", *state);
                return Ok(None);
            }
            *state = SessionState::Stopping;
            self.active.lock().take()
        };
        let Some(run) = run else {
            return Ok(None);
        };

        tracing::info!("Stopping session {}", self.id);
        let _ = self.event_tx.send(SessionEvent::Stopping);
        self.cancel.cancel();

        // One deadline for everyone, not one timeout per worker
        let join_timeout = self.config.join_timeout();
        let deadline = tokio::time::Instant::now() + join_timeout;
        let mut shutdown_timeouts = Vec::new();
        for handle in run.workers.into_iter().chain(run.synchronizer) {
            let name = handle.name().to_string();
            match handle.join_until(deadline, join_timeout).await {
                Ok(()) => tracing::debug!("Joined '{}'", name),
                Err(e) => {
                    tracing::warn!("{}", e);
                    shutdown_timeouts.push(e);
                }
            }
        }
        let stopped_at = Utc::now();

        for (_, buffer) in &run.buffers {
            buffer.seal();
        }
        for spool in &run.spools {
            spool.seal();
        }
        let sync_table = match &run.sync_table {
            Some(shared) => shared.lock().take(),
            None => None,
        };
        let mut sources = self.stats();
        apply_sealed_counts(&mut sources, &run.buffers, &run.spools);

        let mut videos = Vec::new();
        let mut spooled = Vec::new();
        let mut encoding_errors = Vec::new();
        for spool in &run.spools {
            let frame_count = spool.frame_count();
            let timestamps = spool.timestamps();
            let file = match encode_spool(
                spool,
                self.encoder.as_ref(),
                &self.config.output_dir,
                &self.config.video.container,
                self.config.video.encode_timeout(),
            )
            .await
            {
                Ok(Some(artifact)) => {
                    let file = artifact
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string());
                    let _ = self
                        .event_tx
                        .send(SessionEvent::VideoEncoded(artifact.clone()));
                    videos.push(artifact);
                    file
                }
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("{}", e);
                    encoding_errors.push(e);
                    None
                }
            };
            spooled.push(SpooledVideo {
                source_id: spool.source_id().to_string(),
                file,
                frame_count,
                timestamps,
            });
        }

        let mut persistence_errors = Vec::new();
        let mut buffered = Vec::new();
        for (source, buffer) in &run.buffers {
            match buffer.drain() {
                Ok(samples) => buffered.push(BufferedSource {
                    source_id: source.id.clone(),
                    kind: source.kind,
                    samples,
                }),
                Err(e) => {
                    let error = PersistenceError {
                        source_id: source.id.clone(),
                        cause: format!("failed to read buffer: {}", e),
                    };
                    tracing::warn!("{}", error);
                    persistence_errors.push(error);
                }
            }
        }

        let sync_ticks = sync_table.as_ref().map(|t| t.len() as u64);
        let record = SessionRecord {
            session_id: self.id,
            dataset_name: self.config.dataset_name.clone(),
            started_at: run.started_at,
            stopped_at,
            sources: sources.clone(),
            buffers: buffered,
            sync: sync_table,
            videos: spooled,
            video_config: (!run.spools.is_empty()).then(|| self.config.video.clone()),
        };

        let result = PersistenceWriter::new(self.config.output_dir.clone()).write(&record);
        *self.state.write() = SessionState::Saved;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Failed to persist session {}: {}", self.id, e);
                let _ = self.event_tx.send(SessionEvent::Saved {
                    container_path: None,
                });
                return Err(e);
            }
        };
        persistence_errors.extend(outcome.errors);

        let report = SessionReport {
            session_id: self.id,
            started_at: run.started_at,
            stopped_at,
            container_path: Some(outcome.container_path.clone()),
            metadata_path: Some(outcome.metadata_path),
            sources,
            videos,
            sync_ticks,
            encoding_errors,
            persistence_errors,
            shutdown_timeouts,
        };

        tracing::info!(
            "Session {} saved after {:.1}s: {} samples, {} source errors, {} videos",
            self.id,
            report.duration().as_secs_f64(),
            report.sources.iter().map(|s| s.samples).sum::<u64>(),
            report.source_error_count(),
            report.videos.len()
        );
        let _ = self.event_tx.send(SessionEvent::Saved {
            container_path: Some(outcome.container_path),
        });

        Ok(Some(report))
    }

    /// Collect for `duration`, or until the cancel token fires, then stop
    pub async fn run_for_duration(
        &self,
        duration: Duration,
    ) -> SessionResult<Option<SessionReport>> {
        self.start()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                tracing::info!("Collection time of {:?} elapsed", duration);
            }
            _ = self.cancel.cancelled() => {
                tracing::info!("Collection cancelled early");
            }
        }
        self.stop().await
    }

    /// Collect until the cancel token fires, then stop
    pub async fn run_forever(&self) -> SessionResult<Option<SessionReport>> {
        self.start()?;
        self.cancel.cancelled().await;
        self.stop().await
    }

    fn is_spooled(&self, source: &Source) -> bool {
        source.is_image() && self.config.video.enabled
    }

    fn create_sink(&self, source: &Source, spool_root: &Path) -> io::Result<SampleSink> {
        if self.is_spooled(source) {
            let spool = FrameSpool::create(spool_root, &source.id)?;
            return Ok(SampleSink::Spool(Arc::new(spool)));
        }

        let store: Box<dyn SampleStore> = if self.config.is_synchronized() {
            Box::new(LatestOnlyStore::new())
        } else {
            match self.config.store {
                StoreKind::Memory => Box::new(MemoryStore::new()),
                StoreKind::Spill => Box::new(SpillStore::create(spool_root, &source.id)?),
            }
        };
        Ok(SampleSink::Buffer(Arc::new(SourceBuffer::new(
            source.id.clone(),
            store,
        ))))
    }
}

/// Replace live sample counts with what the sealed buffers and spools hold
///
/// A detached worker can still bump its counter after the snapshot was
/// taken; sealed sinks cannot change any more.
fn apply_sealed_counts(
    stats: &mut [SourceStats],
    buffers: &[(Source, Arc<SourceBuffer>)],
    spools: &[Arc<FrameSpool>],
) {
    let sealed: HashMap<&str, u64> = buffers
        .iter()
        .map(|(source, buffer)| (source.id.as_str(), buffer.appended()))
        .chain(spools.iter().map(|spool| (spool.source_id(), spool.frame_count())))
        .collect();
    for entry in stats.iter_mut() {
        if let Some(&count) = sealed.get(entry.source_id.as_str()) {
            entry.samples = count;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if *self.state.read() == SessionState::Collecting {
            tracing::warn!("Session {} dropped while collecting, cancelling workers", self.id);
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("output_dir", &self.config.output_dir)
            .finish()
    }
}
