//! Producer capability
//!
//! Hardware and driver adapters plug into the collector by implementing
//! [`Producer`]. Any `FnMut() -> anyhow::Result<Payload>` closure already does.

use super::types::Payload;

/// Produces one payload on demand; may fail
pub trait Producer: Send + 'static {
    fn produce(&mut self) -> anyhow::Result<Payload>;
}

impl<F> Producer for F
where
    F: FnMut() -> anyhow::Result<Payload> + Send + 'static,
{
    fn produce(&mut self) -> anyhow::Result<Payload> {
        self()
    }
}

/// Owned, type-erased producer
pub type BoxedProducer = Box<dyn Producer>;
