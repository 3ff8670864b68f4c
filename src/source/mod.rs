//! Data sources
//!
//! Source configuration, the sample model and the per-session registry.

pub mod producer;
pub mod registry;
pub mod types;

pub use producer::{BoxedProducer, Producer};
pub use registry::{SourceRegistry, DEFAULT_RATE_HZ};
pub use types::{Payload, Sample, Source, SourceKind, SourceSpec};
