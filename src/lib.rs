//! Multirate Recorder - multi-rate sensor, control and camera data collection.
//!
//! Sources are polled on their own threads at their own rates, buffered in
//! memory (or spilled to disk), optionally aligned to a common rate, and
//! written to a JSON container when the session stops. Image sources are
//! spooled as PNG frames and encoded into one video per source.

pub mod buffer;
pub mod persist;
pub mod recorder;
pub mod source;
pub mod sync;
pub mod utils;
pub mod video;

pub use recorder::{
    cancel_on_interrupt, CancelToken, Session, SessionConfig, SessionEvent, SessionReport,
    SessionState, SyncConfig,
};
pub use source::{Payload, Producer, SourceKind, SourceRegistry, SourceSpec};
pub use utils::error::{CollectorError, SessionResult};
pub use video::VideoConfig;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default log subscriber
///
/// Honours `RUST_LOG`; falls back to debug output for this crate. Calling it
/// more than once is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multirate_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
