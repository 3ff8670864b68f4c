//! Session persistence
//!
//! Writes the structured sample container and its metadata sidecar when a
//! session stops.

pub mod schema;
pub mod writer;

pub use schema::{Container, Metadata, PersistMode, FORMAT_VERSION};
pub use writer::{
    read_container, read_metadata, BufferedSource, PersistOutcome, PersistenceWriter,
    SessionRecord, SpooledVideo,
};
