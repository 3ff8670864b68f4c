//! Spill-to-disk sample store
//!
//! Each sample is appended as one JSON line to a temporary file; the file is
//! read back once at stop and removed when the store is dropped.

use super::store::SampleStore;
use crate::source::types::Sample;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub struct SpillStore {
    file: NamedTempFile,
    writer: BufWriter<File>,
    count: usize,
}

impl SpillStore {
    /// Create a spill file for `source_id` inside `dir`
    pub fn create(dir: &Path, source_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("spill_{}_", source_id))
            .suffix(".jsonl")
            .tempfile_in(dir)?;
        let writer = BufWriter::new(file.as_file().try_clone()?);

        tracing::debug!("Spilling '{}' to {:?}", source_id, file.path());

        Ok(Self {
            file,
            writer,
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl SampleStore for SpillStore {
    fn push(&mut self, sample: Arc<Sample>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, sample.as_ref())?;
        self.writer.write_all(b"\n")?;
        self.count += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn drain(&mut self) -> io::Result<Vec<Arc<Sample>>> {
        self.writer.flush()?;

        let reader = BufReader::new(self.file.reopen()?);
        let mut samples = Vec::with_capacity(self.count);
        let mut skipped = 0usize;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            // A bad line costs one sample, not the whole history
            match serde_json::from_str::<Sample>(&line) {
                Ok(sample) => samples.push(Arc::new(sample)),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        "Skipping unreadable spilled sample at {:?} line {}: {}",
                        self.file.path(),
                        index + 1,
                        e
                    );
                }
            }
        }
        if skipped > 0 {
            tracing::warn!(
                "Recovered {} of {} spilled samples from {:?}",
                samples.len(),
                samples.len() + skipped,
                self.file.path()
            );
        }
        Ok(samples)
    }
}
