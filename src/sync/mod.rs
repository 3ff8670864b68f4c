//! Fixed-rate synchronization of multi-rate sources
//!
//! In synchronized mode one extra thread samples every buffered source at a
//! common rate and builds a single aligned table. The join logic lives here;
//! the thread itself is spawned by the session next to the polling workers.

pub mod join;

pub use join::{LatestValueJoin, SyncFrame, SyncTable};
