//! Source registry
//!
//! Holds the configuration and producer of every named source for one
//! session. Registration only records configuration; nothing is spawned until
//! the session starts.

use super::producer::{BoxedProducer, Producer};
use super::types::{period_for, Source, SourceKind, SourceSpec};
use crate::utils::error::{CollectorError, SessionResult};
use std::collections::HashMap;
use std::fmt;

/// Rate used by [`SourceRegistry::register_default`] unless overridden
pub const DEFAULT_RATE_HZ: f64 = 30.0;

struct SourceEntry {
    source: Source,
    producer: Option<BoxedProducer>,
}

/// Registration-ordered set of sources
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
    index: HashMap<String, usize>,
    default_rate_hz: f64,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            default_rate_hz: DEFAULT_RATE_HZ,
        }
    }

    /// Create a registry with a custom default rate
    pub fn with_default_rate(rate_hz: f64) -> SessionResult<Self> {
        validate_rate("default", rate_hz)?;
        let mut registry = Self::new();
        registry.default_rate_hz = rate_hz;
        Ok(registry)
    }

    /// Register an enabled source
    pub fn register<P: Producer>(
        &mut self,
        id: impl Into<String>,
        kind: SourceKind,
        rate_hz: f64,
        producer: P,
    ) -> SessionResult<Source> {
        self.register_spec(SourceSpec::new(id, kind, rate_hz), producer)
    }

    /// Register a source at the registry's default rate
    pub fn register_default<P: Producer>(
        &mut self,
        id: impl Into<String>,
        kind: SourceKind,
        producer: P,
    ) -> SessionResult<Source> {
        let rate_hz = self.default_rate_hz;
        self.register(id, kind, rate_hz, producer)
    }

    /// Register a source from a full specification
    pub fn register_spec<P: Producer>(
        &mut self,
        spec: SourceSpec,
        producer: P,
    ) -> SessionResult<Source> {
        validate_id(&spec.id)?;
        validate_rate(&spec.id, spec.rate_hz)?;
        if self.index.contains_key(&spec.id) {
            return Err(CollectorError::DuplicateSource(spec.id));
        }

        let source = Source {
            id: spec.id,
            kind: spec.kind,
            rate_hz: spec.rate_hz,
            enabled: spec.enabled,
        };

        tracing::info!(
            "Registered {} source '{}' @ {} Hz{}",
            source.kind.as_str(),
            source.id,
            source.rate_hz,
            if source.enabled { "" } else { " (disabled)" }
        );

        self.index.insert(source.id.clone(), self.entries.len());
        self.entries.push(SourceEntry {
            source: source.clone(),
            producer: Some(Box::new(producer)),
        });
        Ok(source)
    }

    /// All sources in registration order
    pub fn list_sources(&self) -> Vec<Source> {
        self.entries.iter().map(|e| e.source.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.index.get(id).map(|&i| &self.entries[i].source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn default_rate_hz(&self) -> f64 {
        self.default_rate_hz
    }

    /// Move the producers of all enabled sources out of the registry
    ///
    /// Called once when a session starts; producers are owned by their
    /// workers from then on.
    pub(crate) fn take_enabled_producers(&mut self) -> Vec<(Source, BoxedProducer)> {
        self.entries
            .iter_mut()
            .filter(|e| e.source.enabled)
            .filter_map(|e| e.producer.take().map(|p| (e.source.clone(), p)))
            .collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.list_sources())
            .field("default_rate_hz", &self.default_rate_hz)
            .finish()
    }
}

/// Characters that cannot appear in a source id
///
/// Ids become file names (spools, spill files, videos) and part of the
/// encoder's frame pattern.
const FORBIDDEN_ID_CHARS: &[char] = &['/', '\\', ':', '%', '*', '?', '"', '<', '>', '|'];

fn validate_id(id: &str) -> SessionResult<()> {
    if id.trim().is_empty() {
        return Err(CollectorError::InvalidConfig(
            "source id must not be empty".to_string(),
        ));
    }
    if let Some(c) = id
        .chars()
        .find(|c| FORBIDDEN_ID_CHARS.contains(c) || c.is_control())
    {
        return Err(CollectorError::InvalidConfig(format!(
            "source id {:?} contains forbidden character {:?}",
            id, c
        )));
    }
    if id.starts_with('.') {
        return Err(CollectorError::InvalidConfig(format!(
            "source id {:?} must not start with '.'",
            id
        )));
    }
    Ok(())
}

fn validate_rate(id: &str, rate_hz: f64) -> SessionResult<()> {
    if period_for(rate_hz).is_none() {
        return Err(CollectorError::InvalidConfig(format!(
            "rate for '{}' must be a positive number of Hz with a representable period, got {}",
            id, rate_hz
        )));
    }
    Ok(())
}
