//! Polling workers
//!
//! Each enabled source gets its own OS thread that calls the producer once
//! per period, timestamps the payload and hands it to the source's sink.
//! The synchronizer runs on a thread of the same shape.

use super::cancel::CancelToken;
use crate::buffer::{Append, SourceBuffer};
use crate::source::producer::{BoxedProducer, Producer};
use crate::source::types::{period_for, Payload, Sample, Source};
use crate::sync::{LatestValueJoin, SyncTable};
use crate::utils::error::{ShutdownTimeoutError, SourceError};
use crate::utils::unix_seconds;
use crate::video::FrameSpool;
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Where a worker puts what its producer returns
#[derive(Debug, Clone)]
pub(crate) enum SampleSink {
    Buffer(Arc<SourceBuffer>),
    Spool(Arc<FrameSpool>),
}

impl SampleSink {
    fn accept(&self, source_id: &str, timestamp: f64, payload: Payload) -> Result<Append, String> {
        match self {
            SampleSink::Buffer(buffer) => buffer
                .append(Sample {
                    source_id: source_id.to_string(),
                    timestamp,
                    payload,
                })
                .map_err(|e| format!("buffer append failed: {}", e)),
            SampleSink::Spool(spool) => spool
                .write_frame(timestamp, &payload)
                .map_err(|e| format!("spool write failed: {}", e)),
        }
    }
}

/// Live per-source counters, shared between a worker and the session
#[derive(Debug, Default)]
pub(crate) struct SourceCounters {
    samples: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<SourceError>>,
}

impl SourceCounters {
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<SourceError> {
        self.last_error.lock().clone()
    }

    fn record_sample(&self) -> u64 {
        self.samples.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_error(&self, error: SourceError) -> u64 {
        *self.last_error.lock() = Some(error);
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Handle to a running worker or synchronizer thread
pub(crate) struct WorkerHandle {
    name: String,
    done: oneshot::Receiver<()>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the thread to finish, giving up at `deadline`
    ///
    /// A thread that misses the deadline is left running detached; `waited`
    /// is reported in the resulting error.
    pub async fn join_until(
        self,
        deadline: tokio::time::Instant,
        waited: Duration,
    ) -> Result<(), ShutdownTimeoutError> {
        match tokio::time::timeout_at(deadline, self.done).await {
            Ok(_) => {
                // The done sender is the last thing the thread drops
                if self.thread.join().is_err() {
                    tracing::warn!("Thread '{}' panicked while exiting", self.name);
                }
                Ok(())
            }
            Err(_) => Err(ShutdownTimeoutError {
                source_id: self.name,
                waited,
            }),
        }
    }
}

/// Start polling `source` on a dedicated thread
pub(crate) fn spawn_worker(
    source: Source,
    mut producer: BoxedProducer,
    sink: SampleSink,
    counters: Arc<SourceCounters>,
    cancel: CancelToken,
) -> io::Result<WorkerHandle> {
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let name = source.id.clone();

    let thread = thread::Builder::new()
        .name(format!("worker-{}", source.id))
        .spawn(move || {
            let _done = done_tx;
            poll_loop(&source, producer.as_mut(), &sink, &counters, &cancel);
        })?;

    Ok(WorkerHandle {
        name,
        done: done_rx,
        thread,
    })
}

fn poll_loop(
    source: &Source,
    producer: &mut dyn Producer,
    sink: &SampleSink,
    counters: &SourceCounters,
    cancel: &CancelToken,
) {
    let period = source.period();
    tracing::debug!(
        "Worker '{}' started ({} Hz, period {:?})",
        source.id,
        source.rate_hz,
        period
    );

    while !cancel.is_cancelled() {
        let start = Instant::now();

        let outcome = call_producer(producer).and_then(|payload| {
            let timestamp = unix_seconds();
            sink.accept(&source.id, timestamp, payload)
        });

        match outcome {
            Ok(Append::Stored) => {
                let count = counters.record_sample();
                if count % 1000 == 0 {
                    tracing::debug!("'{}' collected {} samples", source.id, count);
                }
            }
            Ok(Append::Sealed) => {
                tracing::debug!("'{}' sink sealed, dropping late sample", source.id);
                break;
            }
            Err(cause) => {
                let error = SourceError {
                    source_id: source.id.clone(),
                    cause,
                };
                let errors = counters.record_error(error.clone());
                if errors == 1 {
                    tracing::warn!("{}", error);
                } else {
                    tracing::debug!("{} ({} failures so far)", error, errors);
                }
            }
        }

        // No catch-up: an over-budget tick simply starts the next one late
        let elapsed = start.elapsed();
        if elapsed < period && cancel.wait_timeout(period - elapsed) {
            break;
        }
    }

    tracing::debug!(
        "Worker '{}' exiting after {} samples, {} errors",
        source.id,
        counters.samples(),
        counters.errors()
    );
}

fn call_producer(producer: &mut dyn Producer) -> Result<Payload, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| producer.produce())) {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("producer panicked: {}", message))
        }
    }
}

/// Aggregate table shared with the synchronizer thread
///
/// The session takes the table out at stop; a tick that finds `None` ends
/// the thread without appending.
pub(crate) type SharedTable = Arc<Mutex<Option<SyncTable>>>;

/// Start the fixed-rate synchronizer
pub(crate) fn spawn_synchronizer(
    mut join: LatestValueJoin,
    table: SharedTable,
    rate_hz: f64,
    cancel: CancelToken,
) -> io::Result<WorkerHandle> {
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let period = period_for(rate_hz).unwrap_or(Duration::from_secs(1));

    let thread = thread::Builder::new()
        .name("synchronizer".to_string())
        .spawn(move || {
            let _done = done_tx;
            tracing::debug!(
                "Synchronizer started ({} Hz over {} sources)",
                rate_hz,
                join.columns().len()
            );

            while !cancel.is_cancelled() {
                let start = Instant::now();
                let frame = join.tick(unix_seconds());
                {
                    let mut guard = table.lock();
                    match guard.as_mut() {
                        Some(table) => table.push(frame),
                        None => break,
                    }
                }

                let elapsed = start.elapsed();
                if elapsed < period && cancel.wait_timeout(period - elapsed) {
                    break;
                }
            }

            tracing::debug!("Synchronizer exiting");
        })?;

    Ok(WorkerHandle {
        name: "synchronizer".to_string(),
        done: done_rx,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::SourceKind;
    use std::sync::atomic::AtomicBool;

    fn source(id: &str, rate_hz: f64) -> Source {
        Source {
            id: id.to_string(),
            kind: SourceKind::Sensor,
            rate_hz,
            enabled: true,
        }
    }

    async fn join(handle: WorkerHandle, timeout: Duration) -> Result<(), ShutdownTimeoutError> {
        handle
            .join_until(tokio::time::Instant::now() + timeout, timeout)
            .await
    }

    #[tokio::test]
    async fn test_worker_polls_at_rate() {
        let buffer = Arc::new(SourceBuffer::in_memory("imu"));
        let counters = Arc::new(SourceCounters::default());
        let cancel = CancelToken::new();

        let handle = spawn_worker(
            source("imu", 50.0),
            Box::new(|| -> anyhow::Result<Payload> { Ok(Payload::Scalar(0.5)) }),
            SampleSink::Buffer(buffer.clone()),
            counters.clone(),
            cancel.clone(),
        )
        .unwrap();
        assert_eq!(handle.name(), "imu");

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        join(handle, Duration::from_secs(2)).await.unwrap();

        let count = buffer.len();
        assert!((18..=28).contains(&count), "got {} samples", count);
        assert_eq!(counters.samples(), count as u64);
        assert_eq!(counters.errors(), 0);
    }

    #[tokio::test]
    async fn test_producer_errors_and_panics_are_counted() {
        let buffer = Arc::new(SourceBuffer::in_memory("flaky"));
        let counters = Arc::new(SourceCounters::default());
        let cancel = CancelToken::new();
        let mut calls = 0u32;

        let handle = spawn_worker(
            source("flaky", 100.0),
            Box::new(move || -> anyhow::Result<Payload> {
                calls += 1;
                match calls % 3 {
                    0 => anyhow::bail!("sensor timeout"),
                    1 => panic!("driver crashed"),
                    _ => Ok(Payload::Scalar(calls as f64)),
                }
            }),
            SampleSink::Buffer(buffer.clone()),
            counters.clone(),
            cancel.clone(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        join(handle, Duration::from_secs(2)).await.unwrap();

        assert!(counters.samples() > 0);
        assert!(counters.errors() >= counters.samples());
        assert_eq!(buffer.len() as u64, counters.samples());
        let last = counters.last_error().unwrap();
        assert_eq!(last.source_id, "flaky");
        assert!(
            last.cause.contains("sensor timeout") || last.cause.contains("driver crashed"),
            "unexpected cause: {}",
            last.cause
        );
    }

    #[tokio::test]
    async fn test_hanging_worker_times_out() {
        let buffer = Arc::new(SourceBuffer::in_memory("stuck"));
        let counters = Arc::new(SourceCounters::default());
        let cancel = CancelToken::new();
        let entered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&entered);

        let handle = spawn_worker(
            source("stuck", 10.0),
            Box::new(move || -> anyhow::Result<Payload> {
                flag.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1500));
                Ok(Payload::Scalar(1.0))
            }),
            SampleSink::Buffer(buffer.clone()),
            counters,
            cancel.clone(),
        )
        .unwrap();

        // Cancel only once the producer is stuck inside its call
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let start = std::time::Instant::now();
        let err = join(handle, Duration::from_millis(100)).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(1000));
        assert_eq!(err.source_id, "stuck");

        // The late sample is discarded once the buffer is sealed
        buffer.seal();
        std::thread::sleep(Duration::from_millis(1700));
        assert_eq!(buffer.len(), 0);
    }

    #[tokio::test]
    async fn test_synchronizer_ticks_until_table_taken() {
        let a = Arc::new(SourceBuffer::in_memory("a"));
        let join_state = LatestValueJoin::new(vec![a.clone()]);
        let table: SharedTable = Arc::new(Mutex::new(Some(SyncTable::new(
            20.0,
            join_state.columns().to_vec(),
        ))));
        let cancel = CancelToken::new();

        let handle = spawn_synchronizer(join_state, table.clone(), 20.0, cancel.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        join(handle, Duration::from_secs(2)).await.unwrap();

        let table = table.lock().take().unwrap();
        assert!(table.len() >= 4, "only {} ticks", table.len());
        for (i, frame) in table.frames().iter().enumerate() {
            assert_eq!(frame.tick, i as u64);
            assert!(frame.get("a").is_none());
        }
    }
}
