//! Image spooling and video encoding
//!
//! Image sources with video enabled write PNG frames into a spool while
//! collecting. On stop each spool is handed to an external encoder, turned
//! into one video per source and deleted.

pub mod encoder;
pub mod pipeline;
pub mod spool;
pub mod types;

pub use encoder::{FfmpegEncoder, FrameEncoder};
pub use pipeline::{encode_spool, video_path};
pub use spool::{frame_file_name, FrameSpool};
pub use types::{SpoolError, VideoArtifact, VideoConfig};
