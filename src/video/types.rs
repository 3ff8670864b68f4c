//! Video encoding configuration and results

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default bound on a single encode
pub const DEFAULT_ENCODE_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// How image sources are turned into video artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConfig {
    /// Spool image sources to disk and encode them on stop. When disabled,
    /// frames stay in memory like any other sample.
    pub enabled: bool,

    /// Encoder executable
    pub binary: PathBuf,

    /// Video codec (libx264, libx265, libsvtav1, ...)
    pub codec: String,

    /// Output pixel format
    pub pixel_format: String,

    /// Constant rate factor (0 = lossless, 51 = worst)
    pub crf: u8,

    /// Target frame rate of the encoded video
    pub fps: u32,

    /// Keyframe interval (GOP size) in frames
    pub keyframe_interval: u32,

    /// Output container extension
    pub container: String,

    /// Upper bound on one source's encode, in milliseconds
    pub encode_timeout_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: PathBuf::from("ffmpeg"),
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            crf: 23,
            fps: 30,
            keyframe_interval: 2,
            container: "mp4".to_string(),
            encode_timeout_ms: DEFAULT_ENCODE_TIMEOUT_MS,
        }
    }
}

impl VideoConfig {
    /// Disabled configuration: image frames are buffered in memory
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_millis(self.encode_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.encode_timeout_ms == 0 {
            return Err("encode timeout must be greater than zero".to_string());
        }
        if self.fps == 0 {
            return Err("video fps must be greater than zero".to_string());
        }
        if self.crf > 63 {
            return Err(format!("crf {} is out of range", self.crf));
        }
        if self.codec.trim().is_empty() {
            return Err("video codec must not be empty".to_string());
        }
        Ok(())
    }
}

/// One encoded video per spooled image source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoArtifact {
    pub source_id: String,
    pub path: PathBuf,
    pub frame_count: u64,
    /// Total size of the spooled frames
    pub spool_bytes: u64,
    pub video_bytes: u64,
    /// `spool_bytes / video_bytes`, 0 when the video is empty
    pub compression_ratio: f64,
}

impl VideoArtifact {
    pub fn ratio(spool_bytes: u64, video_bytes: u64) -> f64 {
        if video_bytes == 0 {
            0.0
        } else {
            spool_bytes as f64 / video_bytes as f64
        }
    }
}

/// Errors writing frames into a spool
#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG encode error: {0}")]
    Png(#[from] png::EncodingError),

    #[error("expected an image frame, got a {0} payload")]
    NotAnImage(&'static str),

    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),

    #[error("frame buffer has {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_collector_settings() {
        let config = VideoConfig::default();
        assert!(config.enabled);
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.crf, 23);
        assert_eq!(config.keyframe_interval, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let config = VideoConfig {
            fps: 0,
            ..VideoConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_encode_timeout() {
        let config = VideoConfig {
            encode_timeout_ms: 0,
            ..VideoConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            VideoConfig::default().encode_timeout(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(VideoArtifact::ratio(1000, 100), 10.0);
        assert_eq!(VideoArtifact::ratio(1000, 0), 0.0);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: VideoConfig = serde_json::from_str(r#"{"codec":"libx265","crf":28}"#).unwrap();
        assert_eq!(config.codec, "libx265");
        assert_eq!(config.crf, 28);
        assert_eq!(config.fps, 30);
    }
}
