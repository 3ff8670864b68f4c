//! Backing stores for source buffers

use crate::source::types::Sample;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

/// Where a buffer keeps its samples
///
/// Workers and the synchronizer only see [`super::SourceBuffer`]; the store
/// behind it can be swapped without touching them.
pub trait SampleStore: Send {
    /// Append one sample
    fn push(&mut self, sample: Arc<Sample>) -> io::Result<()>;

    /// Number of samples pushed so far
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand back every retained sample in append order
    fn drain(&mut self) -> io::Result<Vec<Arc<Sample>>>;
}

/// Store selection for raw (unsynchronized) sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Keep everything in memory
    #[default]
    Memory,
    /// Append to a JSON-lines file, read back at stop
    Spill,
}

/// Keeps every sample in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: Vec<Arc<Sample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleStore for MemoryStore {
    fn push(&mut self, sample: Arc<Sample>) -> io::Result<()> {
        self.samples.push(sample);
        Ok(())
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn drain(&mut self) -> io::Result<Vec<Arc<Sample>>> {
        Ok(std::mem::take(&mut self.samples))
    }
}

/// Only counts samples
///
/// Used in synchronized mode, where the buffer's latest value is all the
/// synchronizer needs and the aggregate table replaces per-source history.
#[derive(Debug, Default)]
pub struct LatestOnlyStore {
    count: usize,
}

impl LatestOnlyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleStore for LatestOnlyStore {
    fn push(&mut self, _sample: Arc<Sample>) -> io::Result<()> {
        self.count += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn drain(&mut self) -> io::Result<Vec<Arc<Sample>>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::Payload;

    fn sample(ts: f64) -> Arc<Sample> {
        Arc::new(Sample {
            source_id: "imu".into(),
            timestamp: ts,
            payload: Payload::Scalar(ts),
        })
    }

    #[test]
    fn test_memory_store_drain_keeps_order() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.push(sample(i as f64)).unwrap();
        }
        assert_eq!(store.len(), 5);

        let drained = store.drain().unwrap();
        let ts: Vec<f64> = drained.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_latest_only_store_counts() {
        let mut store = LatestOnlyStore::new();
        store.push(sample(1.0)).unwrap();
        store.push(sample(2.0)).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.drain().unwrap().is_empty());
    }
}
