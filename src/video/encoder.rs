//! External video encoder
//!
//! Spooled frames are compressed by an external process. [`FfmpegEncoder`]
//! drives the FFmpeg CLI; tests and alternative toolchains can plug in their
//! own [`FrameEncoder`].

use super::spool::FRAME_EXTENSION;
use super::types::VideoConfig;
use crate::utils::error::EncodingError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Turns a directory of numbered frames into one video file
#[async_trait]
pub trait FrameEncoder: Send + Sync {
    async fn encode(
        &self,
        source_id: &str,
        frames_dir: &Path,
        output: &Path,
    ) -> Result<(), EncodingError>;
}

/// FFmpeg command-line encoder
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    config: VideoConfig,
}

impl FfmpegEncoder {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Command-line arguments for one spool
    pub fn build_args(&self, frames_dir: &Path, output: &Path) -> Vec<String> {
        let pattern = frames_dir.join(format!("%06d.{}", FRAME_EXTENSION));
        vec![
            "-y".to_string(), // Overwrite output
            "-loglevel".to_string(),
            "error".to_string(),
            "-framerate".to_string(),
            self.config.fps.to_string(),
            "-i".to_string(),
            pattern.to_string_lossy().to_string(),
            "-c:v".to_string(),
            self.config.codec.clone(),
            "-crf".to_string(),
            self.config.crf.to_string(),
            "-pix_fmt".to_string(),
            self.config.pixel_format.clone(),
            "-g".to_string(),
            self.config.keyframe_interval.to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl FrameEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        source_id: &str,
        frames_dir: &Path,
        output: &Path,
    ) -> Result<(), EncodingError> {
        let args = self.build_args(frames_dir, output);
        tracing::info!(
            "Encoding '{}' -> {:?} ({} @ {}fps, crf={})",
            source_id,
            output,
            self.config.codec,
            self.config.fps,
            self.config.crf
        );
        tracing::debug!("Encoder command: {:?} {:?}", self.config.binary, args);

        let result = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EncodingError {
                source_id: source_id.to_string(),
                stderr: format!("failed to run {:?}: {}", self.config.binary, e),
            })?;

        if !result.status.success() {
            return Err(EncodingError {
                source_id: source_id.to_string(),
                stderr: format!(
                    "{} exited with {}: {}",
                    self.config.binary.display(),
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }

        if !output.exists() {
            return Err(EncodingError {
                source_id: source_id.to_string(),
                stderr: format!("encoder reported success but {:?} was not created", output),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_args() {
        let encoder = FfmpegEncoder::new(VideoConfig {
            codec: "libx265".to_string(),
            crf: 28,
            fps: 15,
            keyframe_interval: 4,
            ..VideoConfig::default()
        });
        let args = encoder.build_args(
            &PathBuf::from("/tmp/spool"),
            &PathBuf::from("/data/front_cam.mp4"),
        );

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-framerate") + 1], "15");
        assert_eq!(args[pos("-i") + 1], "/tmp/spool/%06d.png");
        assert_eq!(args[pos("-c:v") + 1], "libx265");
        assert_eq!(args[pos("-crf") + 1], "28");
        assert_eq!(args[pos("-pix_fmt") + 1], "yuv420p");
        assert_eq!(args[pos("-g") + 1], "4");
        assert_eq!(args.last().unwrap(), "/data/front_cam.mp4");
    }

    #[tokio::test]
    async fn test_missing_binary_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FfmpegEncoder::new(VideoConfig {
            binary: dir.path().join("no-such-encoder"),
            ..VideoConfig::default()
        });

        let err = encoder
            .encode("front_cam", dir.path(), &dir.path().join("front_cam.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.source_id, "front_cam");
        assert!(err.stderr.contains("failed to run"));
    }
}
