//! Per-source sample buffers
//!
//! A [`SourceBuffer`] is written by exactly one worker, peeked by the
//! synchronizer and drained once by the persistence writer. Each buffer has
//! its own lock, so high-rate sources never contend with each other.

pub mod spill;
pub mod store;

pub use spill::SpillStore;
pub use store::{LatestOnlyStore, MemoryStore, SampleStore, StoreKind};

use crate::source::types::Sample;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Result of an append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Stored,
    /// The buffer was sealed at stop; the sample was discarded
    Sealed,
}

struct BufferInner {
    store: Box<dyn SampleStore>,
    latest: Option<Arc<Sample>>,
    sequence: u64,
    sealed: bool,
}

pub struct SourceBuffer {
    source_id: String,
    inner: Mutex<BufferInner>,
}

impl SourceBuffer {
    pub fn new(source_id: impl Into<String>, store: Box<dyn SampleStore>) -> Self {
        Self {
            source_id: source_id.into(),
            inner: Mutex::new(BufferInner {
                store,
                latest: None,
                sequence: 0,
                sealed: false,
            }),
        }
    }

    /// In-memory buffer
    pub fn in_memory(source_id: impl Into<String>) -> Self {
        Self::new(source_id, Box::new(MemoryStore::new()))
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn append(&self, sample: Sample) -> io::Result<Append> {
        let sample = Arc::new(sample);
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Ok(Append::Sealed);
        }
        inner.store.push(Arc::clone(&sample))?;
        inner.latest = Some(sample);
        inner.sequence += 1;
        Ok(Append::Stored)
    }

    /// Most recent sample with its sequence number (1-based, 0 = nothing yet)
    pub fn latest(&self) -> Option<(u64, Arc<Sample>)> {
        let inner = self.inner.lock();
        inner.latest.clone().map(|s| (inner.sequence, s))
    }

    /// Samples accepted since creation, frozen once sealed
    ///
    /// Unlike [`len`](Self::len) this also counts samples a latest-only store
    /// has already replaced.
    pub fn appended(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// Number of samples held by the store
    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse all further appends
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Seal the buffer and take its samples
    pub fn drain(&self) -> io::Result<Vec<Arc<Sample>>> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        inner.store.drain()
    }
}

impl std::fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SourceBuffer")
            .field("source_id", &self.source_id)
            .field("len", &inner.store.len())
            .field("sequence", &inner.sequence)
            .field("sealed", &inner.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::Payload;

    fn sample(value: f64) -> Sample {
        Sample {
            source_id: "gripper".into(),
            timestamp: value,
            payload: Payload::Scalar(value),
        }
    }

    #[test]
    fn test_latest_tracks_sequence() {
        let buffer = SourceBuffer::in_memory("gripper");
        assert!(buffer.latest().is_none());

        buffer.append(sample(1.0)).unwrap();
        buffer.append(sample(2.0)).unwrap();

        let (seq, latest) = buffer.latest().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(latest.payload, Payload::Scalar(2.0));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_sealed_buffer_rejects_appends() {
        let buffer = SourceBuffer::in_memory("gripper");
        buffer.append(sample(1.0)).unwrap();
        buffer.seal();

        assert_eq!(buffer.append(sample(2.0)).unwrap(), Append::Sealed);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.appended(), 1);
        assert_eq!(buffer.drain().unwrap().len(), 1);
    }

    #[test]
    fn test_drain_seals() {
        let buffer = SourceBuffer::in_memory("gripper");
        buffer.append(sample(1.0)).unwrap();
        let drained = buffer.drain().unwrap();
        assert_eq!(drained.len(), 1);
        assert!(buffer.is_sealed());
        assert_eq!(buffer.append(sample(3.0)).unwrap(), Append::Sealed);
    }
}
