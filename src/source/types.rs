//! Source and sample definitions

use crate::utils::json_float;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Measurements (joint encoders, IMU, tactile arrays, ...)
    Sensor,
    /// Control / teleoperation commands
    Control,
    /// Camera frames
    Image,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sensor => "sensor",
            SourceKind::Control => "control",
            SourceKind::Image => "image",
        }
    }
}

/// A registered data source
///
/// The producer capability is stored separately by the registry so that
/// `Source` stays a plain, cloneable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Unique source name
    pub id: String,

    /// Source kind
    pub kind: SourceKind,

    /// Sampling rate in Hz
    pub rate_hz: f64,

    /// Disabled sources are registered but never polled
    pub enabled: bool,
}

/// Tick period for `rate_hz`
///
/// `None` unless the rate is positive, finite and its period fits a non-zero
/// [`Duration`].
pub fn period_for(rate_hz: f64) -> Option<Duration> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

impl Source {
    /// Time between two ticks of this source
    ///
    /// Registered sources always have a representable period; a hand-built
    /// `Source` with an unusable rate falls back to one second.
    pub fn period(&self) -> Duration {
        period_for(self.rate_hz).unwrap_or(Duration::from_secs(1))
    }

    pub fn is_image(&self) -> bool {
        self.kind == SourceKind::Image
    }
}

/// Registration request for a source
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub id: String,
    pub kind: SourceKind,
    pub rate_hz: f64,
    pub enabled: bool,
}

impl SourceSpec {
    pub fn new(id: impl Into<String>, kind: SourceKind, rate_hz: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            rate_hz,
            enabled: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// One value produced by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    Scalar(#[serde(with = "json_float")] f64),
    Vector(#[serde(with = "json_float::vec")] Vec<f64>),
    Tensor {
        shape: Vec<usize>,
        data: Vec<u8>,
    },
    /// Row-major HxWxC pixel buffer
    ImageFrame {
        height: u32,
        width: u32,
        channels: u8,
        data: Vec<u8>,
    },
}

impl Payload {
    /// Build an image frame, checking that the buffer matches the dimensions
    pub fn image(height: u32, width: u32, channels: u8, data: Vec<u8>) -> anyhow::Result<Self> {
        let expected = height as usize * width as usize * channels as usize;
        if data.len() != expected {
            anyhow::bail!(
                "frame buffer has {} bytes, expected {} ({}x{}x{})",
                data.len(),
                expected,
                height,
                width,
                channels
            );
        }
        Ok(Payload::ImageFrame {
            height,
            width,
            channels,
            data,
        })
    }

    /// Short name of the variant, used in the container layout
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Scalar(_) => "scalar",
            Payload::Vector(_) => "vector",
            Payload::Tensor { .. } => "tensor",
            Payload::ImageFrame { .. } => "image",
        }
    }

    /// Per-sample shape: `[]` for scalars, `[n]` for vectors, `[h, w, c]` for frames
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Payload::Scalar(_) => Vec::new(),
            Payload::Vector(values) => vec![values.len()],
            Payload::Tensor { shape, .. } => shape.clone(),
            Payload::ImageFrame {
                height,
                width,
                channels,
                ..
            } => vec![*height as usize, *width as usize, *channels as usize],
        }
    }
}

/// A timestamped payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub source_id: String,

    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,

    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_rate() {
        let source = Source {
            id: "imu".into(),
            kind: SourceKind::Sensor,
            rate_hz: 100.0,
            enabled: true,
        };
        assert_eq!(source.period(), Duration::from_millis(10));
    }

    #[test]
    fn test_image_payload_size_check() {
        assert!(Payload::image(2, 2, 3, vec![0; 12]).is_ok());
        assert!(Payload::image(2, 2, 3, vec![0; 11]).is_err());
    }

    #[test]
    fn test_payload_shapes() {
        assert!(Payload::Scalar(1.0).shape().is_empty());
        assert_eq!(Payload::Vector(vec![0.0; 7]).shape(), vec![7]);
        let frame = Payload::image(4, 6, 1, vec![0; 24]).unwrap();
        assert_eq!(frame.shape(), vec![4, 6, 1]);
        assert_eq!(frame.type_name(), "image");
    }
}
