//! Collection session module
//!
//! This module implements the concurrent acquisition engine:
//! - Session to drive the lifecycle of one collection run
//! - polling workers and the synchronizer thread
//! - CancelToken shared by threads and async callers

pub mod cancel;
pub mod session;
pub mod signal;
pub mod state;
mod worker;

pub use cancel::CancelToken;
pub use session::Session;
pub use signal::cancel_on_interrupt;
pub use state::{
    SessionConfig, SessionEvent, SessionReport, SessionState, SourceStats, SyncConfig,
    DEFAULT_JOIN_TIMEOUT_MS,
};
