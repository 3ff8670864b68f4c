//! Latest-value-hold join
//!
//! Every tick takes, for each source, the newest sample appended since the
//! previous tick. Sources with nothing new repeat their previous value;
//! sources that never produced anything stay absent.

use crate::buffer::SourceBuffer;
use crate::source::types::Sample;
use std::sync::Arc;

/// One aligned row of the aggregate table
#[derive(Debug, Clone)]
pub struct SyncFrame {
    /// Tick index, contiguous from 0
    pub tick: u64,

    /// Wall-clock time of the tick
    pub timestamp: f64,

    columns: Arc<[String]>,
    values: Vec<Option<Arc<Sample>>>,
}

impl SyncFrame {
    /// Value of `source_id` at this tick
    pub fn get(&self, source_id: &str) -> Option<&Sample> {
        self.columns
            .iter()
            .position(|c| c == source_id)
            .and_then(|i| self.values[i].as_deref())
    }

    /// `(source id, value)` pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Sample>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(|v| v.as_deref()))
    }
}

/// Stateful joiner over a fixed set of buffers
pub struct LatestValueJoin {
    buffers: Vec<Arc<SourceBuffer>>,
    columns: Arc<[String]>,
    last_sequence: Vec<u64>,
    held: Vec<Option<Arc<Sample>>>,
    next_tick: u64,
}

impl LatestValueJoin {
    pub fn new(buffers: Vec<Arc<SourceBuffer>>) -> Self {
        let columns: Arc<[String]> = buffers
            .iter()
            .map(|b| b.source_id().to_string())
            .collect::<Vec<_>>()
            .into();
        let n = buffers.len();
        Self {
            buffers,
            columns,
            last_sequence: vec![0; n],
            held: vec![None; n],
            next_tick: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Produce the frame for the next tick
    pub fn tick(&mut self, timestamp: f64) -> SyncFrame {
        for (i, buffer) in self.buffers.iter().enumerate() {
            if let Some((sequence, sample)) = buffer.latest() {
                if sequence > self.last_sequence[i] {
                    // Anything appended between the previous tick and this
                    // one is superseded by the newest sample.
                    self.last_sequence[i] = sequence;
                    self.held[i] = Some(sample);
                }
            }
        }

        let frame = SyncFrame {
            tick: self.next_tick,
            timestamp,
            columns: Arc::clone(&self.columns),
            values: self.held.clone(),
        };
        self.next_tick += 1;
        frame
    }
}

/// Aggregate sequence of sync frames
#[derive(Debug, Clone)]
pub struct SyncTable {
    pub rate_hz: f64,
    columns: Vec<String>,
    frames: Vec<SyncFrame>,
}

impl SyncTable {
    pub fn new(rate_hz: f64, columns: Vec<String>) -> Self {
        Self {
            rate_hz,
            columns,
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: SyncFrame) {
        debug_assert_eq!(frame.tick, self.frames.len() as u64);
        self.frames.push(frame);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn frames(&self) -> &[SyncFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Values of one source across all ticks
    pub fn column(&self, source_id: &str) -> Vec<Option<&Sample>> {
        self.frames.iter().map(|f| f.get(source_id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::Payload;

    fn push(buffer: &SourceBuffer, value: f64) {
        buffer
            .append(Sample {
                source_id: buffer.source_id().to_string(),
                timestamp: value,
                payload: Payload::Scalar(value),
            })
            .unwrap();
    }

    fn value(frame: &SyncFrame, id: &str) -> Option<f64> {
        frame.get(id).map(|s| match s.payload {
            Payload::Scalar(v) => v,
            _ => panic!("expected scalar"),
        })
    }

    #[test]
    fn test_absent_until_first_sample() {
        let slow = Arc::new(SourceBuffer::in_memory("slow"));
        let mut join = LatestValueJoin::new(vec![slow.clone()]);

        assert_eq!(value(&join.tick(0.0), "slow"), None);
        assert_eq!(value(&join.tick(0.1), "slow"), None);
        push(&slow, 7.0);
        assert_eq!(value(&join.tick(0.2), "slow"), Some(7.0));
    }

    #[test]
    fn test_latest_wins_and_hold() {
        let fast = Arc::new(SourceBuffer::in_memory("fast"));
        let slow = Arc::new(SourceBuffer::in_memory("slow"));
        let mut join = LatestValueJoin::new(vec![fast.clone(), slow.clone()]);

        push(&fast, 1.0);
        push(&fast, 2.0);
        push(&fast, 3.0);
        push(&slow, 10.0);
        let first = join.tick(0.0);
        assert_eq!(value(&first, "fast"), Some(3.0));
        assert_eq!(value(&first, "slow"), Some(10.0));

        push(&fast, 4.0);
        let second = join.tick(0.1);
        assert_eq!(value(&second, "fast"), Some(4.0));
        // Nothing new from slow: previous value is held
        assert_eq!(value(&second, "slow"), Some(10.0));

        let third = join.tick(0.2);
        assert_eq!(value(&third, "fast"), Some(4.0));
        assert_eq!(third.tick, 2);
    }

    #[test]
    fn test_repeated_value_is_new_sample() {
        // Identical payloads are still new samples for the join
        let buffer = Arc::new(SourceBuffer::in_memory("flag"));
        let mut join = LatestValueJoin::new(vec![buffer.clone()]);
        push(&buffer, 1.0);
        join.tick(0.0);
        push(&buffer, 1.0);
        join.tick(0.1);
        let (seq, _) = buffer.latest().unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn test_table_ticks_are_contiguous() {
        let a = Arc::new(SourceBuffer::in_memory("a"));
        let mut join = LatestValueJoin::new(vec![a.clone()]);
        let mut table = SyncTable::new(10.0, join.columns().to_vec());

        for i in 0..5 {
            if i % 2 == 0 {
                push(&a, i as f64);
            }
            table.push(join.tick(i as f64 * 0.1));
        }

        let ticks: Vec<u64> = table.frames().iter().map(|f| f.tick).collect();
        assert_eq!(ticks, vec![0, 1, 2, 3, 4]);
        let column: Vec<Option<f64>> = table
            .column("a")
            .into_iter()
            .map(|s| s.map(|s| s.timestamp))
            .collect();
        assert_eq!(
            column,
            vec![Some(0.0), Some(0.0), Some(2.0), Some(2.0), Some(4.0)]
        );
        assert_eq!(table.frames()[1].iter().count(), 1);
    }
}
