//! On-disk frame spool for image sources
//!
//! Frames are written as `000000.png`, `000001.png`, ... into a temporary
//! directory owned by the spool. The capture timestamp of every frame is kept
//! alongside so the encoded video can be paired with wall-clock time.

use super::types::SpoolError;
use crate::buffer::Append;
use crate::source::types::Payload;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Frame file extension
pub const FRAME_EXTENSION: &str = "png";

/// Frame file name for a given counter value
pub fn frame_file_name(counter: u64) -> String {
    format!("{:06}.{}", counter, FRAME_EXTENSION)
}

struct SpoolInner {
    dir: Option<TempDir>,
    counter: u64,
    timestamps: Vec<f64>,
    bytes_written: u64,
    sealed: bool,
}

pub struct FrameSpool {
    source_id: String,
    path: PathBuf,
    inner: Mutex<SpoolInner>,
}

impl FrameSpool {
    /// Create an empty spool directory for `source_id` under `root`
    pub fn create(root: &Path, source_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("images_{}_", source_id))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();

        tracing::debug!("Spooling '{}' frames to {:?}", source_id, path);

        Ok(Self {
            source_id: source_id.to_string(),
            path,
            inner: Mutex::new(SpoolInner {
                dir: Some(dir),
                counter: 0,
                timestamps: Vec::new(),
                bytes_written: 0,
                sealed: false,
            }),
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Spool directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode one frame to disk and record its timestamp
    pub fn write_frame(&self, timestamp: f64, payload: &Payload) -> Result<Append, SpoolError> {
        let (height, width, channels, data) = match payload {
            Payload::ImageFrame {
                height,
                width,
                channels,
                data,
            } => (*height, *width, *channels, data),
            other => return Err(SpoolError::NotAnImage(other.type_name())),
        };

        let color = match channels {
            1 => png::ColorType::Grayscale,
            2 => png::ColorType::GrayscaleAlpha,
            3 => png::ColorType::Rgb,
            4 => png::ColorType::Rgba,
            n => return Err(SpoolError::UnsupportedChannels(n)),
        };

        let expected = height as usize * width as usize * channels as usize;
        if data.len() != expected {
            return Err(SpoolError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let mut inner = self.inner.lock();
        if inner.sealed {
            return Ok(Append::Sealed);
        }

        let frame_path = self.path.join(frame_file_name(inner.counter));
        let file = File::create(&frame_path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(data)?;
        writer.finish()?;

        inner.bytes_written += std::fs::metadata(&frame_path)?.len();
        inner.timestamps.push(timestamp);
        inner.counter += 1;
        Ok(Append::Stored)
    }

    /// Number of frames written
    pub fn frame_count(&self) -> u64 {
        self.inner.lock().counter
    }

    /// Capture timestamps, one per frame
    pub fn timestamps(&self) -> Vec<f64> {
        self.inner.lock().timestamps.clone()
    }

    /// Total size of the frame files written so far
    pub fn bytes_written(&self) -> u64 {
        self.inner.lock().bytes_written
    }

    /// Refuse all further frames
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    /// Delete the spool directory
    ///
    /// Safe to call more than once; only the first call touches the disk.
    pub fn remove(&self) -> io::Result<()> {
        let dir = {
            let mut inner = self.inner.lock();
            inner.sealed = true;
            inner.dir.take()
        };
        match dir {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for FrameSpool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSpool")
            .field("source_id", &self.source_id)
            .field("path", &self.path)
            .field("frames", &self.frame_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rgb_frame(value: u8) -> Payload {
        Payload::image(4, 6, 3, vec![value; 4 * 6 * 3]).unwrap()
    }

    #[test]
    fn test_frame_file_name_is_zero_padded() {
        assert_eq!(frame_file_name(0), "000000.png");
        assert_eq!(frame_file_name(42), "000042.png");
    }

    #[test]
    fn test_write_frames_sequentially() {
        let root = tempdir().unwrap();
        let spool = FrameSpool::create(root.path(), "front_cam").unwrap();

        for i in 0..3 {
            let outcome = spool.write_frame(10.0 + i as f64, &rgb_frame(i * 40)).unwrap();
            assert_eq!(outcome, Append::Stored);
        }

        assert_eq!(spool.frame_count(), 3);
        assert_eq!(spool.timestamps(), vec![10.0, 11.0, 12.0]);
        assert!(spool.path().join("000002.png").exists());
        assert!(spool.bytes_written() > 0);

        // Frames decode back to the original dimensions
        let file = File::open(spool.path().join("000001.png")).unwrap();
        let mut reader = png::Decoder::new(file).read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (6, 4));
        assert_eq!(info.color_type, png::ColorType::Rgb);
        assert!(buf[..info.buffer_size()].iter().all(|&b| b == 40));
    }

    #[test]
    fn test_rejects_non_image_payload() {
        let root = tempdir().unwrap();
        let spool = FrameSpool::create(root.path(), "front_cam").unwrap();
        let err = spool.write_frame(1.0, &Payload::Scalar(1.0)).unwrap_err();
        assert!(matches!(err, SpoolError::NotAnImage("scalar")));
        assert_eq!(spool.frame_count(), 0);
    }

    #[test]
    fn test_sealed_spool_discards_frames() {
        let root = tempdir().unwrap();
        let spool = FrameSpool::create(root.path(), "front_cam").unwrap();
        spool.seal();
        assert_eq!(spool.write_frame(1.0, &rgb_frame(0)).unwrap(), Append::Sealed);
        assert_eq!(spool.frame_count(), 0);
    }

    #[test]
    fn test_remove_deletes_directory() {
        let root = tempdir().unwrap();
        let spool = FrameSpool::create(root.path(), "front_cam").unwrap();
        spool.write_frame(1.0, &rgb_frame(1)).unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());

        spool.remove().unwrap();
        assert!(!path.exists());
        spool.remove().unwrap();
    }
}
