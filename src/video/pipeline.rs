//! Spool → encode → cleanup

use super::encoder::FrameEncoder;
use super::spool::FrameSpool;
use super::types::VideoArtifact;
use crate::utils::error::EncodingError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output path of the video for `source_id`
pub fn video_path(output_dir: &Path, source_id: &str, container: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", source_id, container))
}

/// Encode one spool and delete it afterwards
///
/// Returns `Ok(None)` when the spool holds no frames. An encoder still
/// running after `timeout` is abandoned and reported as an [`EncodingError`].
/// The spool directory is removed whatever the outcome; a failed removal is
/// only logged.
pub async fn encode_spool(
    spool: &FrameSpool,
    encoder: &dyn FrameEncoder,
    output_dir: &Path,
    container: &str,
    timeout: Duration,
) -> Result<Option<VideoArtifact>, EncodingError> {
    spool.seal();
    let result = encode_frames(spool, encoder, output_dir, container, timeout).await;

    if let Err(e) = spool.remove() {
        tracing::warn!(
            "Failed to remove spool for '{}' at {:?}: {}",
            spool.source_id(),
            spool.path(),
            e
        );
    } else {
        tracing::debug!("Removed spool {:?}", spool.path());
    }

    result
}

async fn encode_frames(
    spool: &FrameSpool,
    encoder: &dyn FrameEncoder,
    output_dir: &Path,
    container: &str,
    timeout: Duration,
) -> Result<Option<VideoArtifact>, EncodingError> {
    let source_id = spool.source_id();
    let frame_count = spool.frame_count();
    if frame_count == 0 {
        tracing::warn!("No frames spooled for '{}', skipping encode", source_id);
        return Ok(None);
    }

    let output = video_path(output_dir, source_id, container);
    match tokio::time::timeout(timeout, encoder.encode(source_id, spool.path(), &output)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(EncodingError {
                source_id: source_id.to_string(),
                stderr: format!("encoder did not finish within {:?}", timeout),
            })
        }
    }

    let video_bytes = std::fs::metadata(&output)
        .map(|m| m.len())
        .map_err(|e| EncodingError {
            source_id: source_id.to_string(),
            stderr: format!("cannot stat {:?}: {}", output, e),
        })?;
    let spool_bytes = spool.bytes_written();
    let compression_ratio = VideoArtifact::ratio(spool_bytes, video_bytes);

    tracing::info!(
        "'{}' encoded: {} frames, compression {:.1}x ({:.1}MB -> {:.1}MB)",
        source_id,
        frame_count,
        compression_ratio,
        spool_bytes as f64 / 1024.0 / 1024.0,
        video_bytes as f64 / 1024.0 / 1024.0
    );

    Ok(Some(VideoArtifact {
        source_id: source_id.to_string(),
        path: output,
        frame_count,
        spool_bytes,
        video_bytes,
        compression_ratio,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::Payload;
    use async_trait::async_trait;
    use tempfile::tempdir;

    /// Writes a small fixed-size file instead of running a real encoder
    struct StubEncoder {
        fail: bool,
    }

    #[async_trait]
    impl FrameEncoder for StubEncoder {
        async fn encode(
            &self,
            source_id: &str,
            frames_dir: &Path,
            output: &Path,
        ) -> Result<(), EncodingError> {
            assert!(frames_dir.join("000000.png").exists());
            if self.fail {
                return Err(EncodingError {
                    source_id: source_id.to_string(),
                    stderr: "Unknown encoder".to_string(),
                });
            }
            std::fs::write(output, vec![0u8; 10]).unwrap();
            Ok(())
        }
    }

    const LIMIT: Duration = Duration::from_secs(5);

    /// Never finishes
    struct HangingEncoder;

    #[async_trait]
    impl FrameEncoder for HangingEncoder {
        async fn encode(
            &self,
            _source_id: &str,
            _frames_dir: &Path,
            _output: &Path,
        ) -> Result<(), EncodingError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn spool_with_frames(root: &Path, frames: usize) -> FrameSpool {
        let spool = FrameSpool::create(root, "wrist_cam").unwrap();
        for i in 0..frames {
            let frame = Payload::image(8, 8, 3, vec![(i * 17) as u8; 192]).unwrap();
            spool.write_frame(i as f64, &frame).unwrap();
        }
        spool
    }

    #[tokio::test]
    async fn test_encode_reports_ratio_and_cleans_up() {
        let out = tempdir().unwrap();
        let spool = spool_with_frames(out.path(), 3);
        let spool_dir = spool.path().to_path_buf();

        let artifact = encode_spool(&spool, &StubEncoder { fail: false }, out.path(), "mp4", LIMIT)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(artifact.frame_count, 3);
        assert_eq!(artifact.video_bytes, 10);
        assert_eq!(artifact.path, out.path().join("wrist_cam.mp4"));
        assert!((artifact.compression_ratio - spool.bytes_written() as f64 / 10.0).abs() < 1e-9);
        assert!(!spool_dir.exists());
    }

    #[tokio::test]
    async fn test_failed_encode_still_removes_spool() {
        let out = tempdir().unwrap();
        let spool = spool_with_frames(out.path(), 2);
        let spool_dir = spool.path().to_path_buf();

        let err = encode_spool(&spool, &StubEncoder { fail: true }, out.path(), "mp4", LIMIT)
            .await
            .unwrap_err();
        assert_eq!(err.source_id, "wrist_cam");
        assert!(!spool_dir.exists());
    }

    #[tokio::test]
    async fn test_empty_spool_skips_encoder() {
        let out = tempdir().unwrap();
        let spool = spool_with_frames(out.path(), 0);

        let result = encode_spool(&spool, &StubEncoder { fail: true }, out.path(), "mp4", LIMIT)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!spool.path().exists());
    }

    #[tokio::test]
    async fn test_hung_encoder_times_out() {
        let out = tempdir().unwrap();
        let spool = spool_with_frames(out.path(), 2);
        let spool_dir = spool.path().to_path_buf();

        let start = std::time::Instant::now();
        let err = encode_spool(
            &spool,
            &HangingEncoder,
            out.path(),
            "mp4",
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(err.source_id, "wrist_cam");
        assert!(err.stderr.contains("did not finish"));
        assert!(!spool_dir.exists());
    }
}
