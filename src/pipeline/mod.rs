//! Pipeline stage contracts and the built-in plugins that implement them:
//! one trait per stage kind instead of a single generic `Stage`.

pub mod enrich;
pub mod filter;
pub mod process;
pub mod redact;
pub mod serialize;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::StageError;
use crate::value::Data;

/// Common plugin metadata: every stage plugin has a name, a type tag, and
/// optional start/stop lifecycle hooks.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> &'static str;

    async fn start(&self) -> Result<(), StageError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Drops or mutates events pre-enqueue (or pre-flush, per configuration).
#[async_trait]
pub trait Filter: Plugin {
    /// `None` drops the event.
    async fn filter(&self, event: Envelope) -> Option<Envelope>;
}

/// Adds nested fields to be deep-merged into `diagnostics`/`context`.
#[async_trait]
pub trait Enricher: Plugin {
    async fn enrich(&self, event: &Envelope) -> Result<Data, StageError>;
}

/// Masks, strips, or removes sensitive data from an event snapshot. Returns
/// an error rather than panicking on internal failure; what happens to the
/// event then is governed by the chain's `RedactionFailMode`.
#[async_trait]
pub trait Redactor: Plugin {
    async fn redact(&self, event: Envelope) -> Result<Envelope, StageError>;
}

/// Free-form transformation over the built envelope (size guarding,
/// zero-copy hooks).
#[async_trait]
pub trait Processor: Plugin {
    async fn process(&self, event: &Envelope) -> Result<Envelope, StageError>;
}

/// Produces the canonical wire bytes for one event.
pub trait Serializer: Plugin {
    fn serialize(&self, event: &Envelope) -> Result<Vec<u8>, crate::error::SerializationError>;
}

/// What to do when a stage plugin fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionFailMode {
    /// The stage error is recorded as a diagnostic; the event continues
    /// with whatever the last-good snapshot was.
    Open,
    /// The event is dropped instead.
    Closed,
}

/// Whether serialization failures drop the event or fall back to a
/// best-effort minimal envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictEnvelopeMode {
    Strict,
    BestEffort,
}

/// External plugins are blocked by default; an allowlist or an explicit
/// `allow_external` opt-in is required to run a plugin whose name is not one
/// of the built-ins.
#[derive(Debug, Clone, Default)]
pub struct PluginPolicy {
    allow_external: bool,
    allowlist: std::collections::HashSet<String>,
}

impl PluginPolicy {
    pub fn new(allow_external: bool, allowlist: impl IntoIterator<Item = String>) -> Self {
        PluginPolicy { allow_external, allowlist: allowlist.into_iter().collect() }
    }

    pub fn is_permitted(&self, plugin_name: &str, is_builtin: bool) -> bool {
        is_builtin || self.allow_external || self.allowlist.contains(plugin_name)
    }
}

/// An ordered chain of filters applied left to right, short-circuiting on
/// the first drop.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        FilterChain { filters }
    }

    pub async fn apply(&self, mut event: Envelope) -> Option<Envelope> {
        for filter in &self.filters {
            event = filter.filter(event).await?;
        }
        Some(event)
    }
}

/// An ordered chain of enrichers; each contributes a partial map that is
/// deep-merged into the event's `diagnostics`. A failing enricher is
/// contained per `RedactionFailMode`-style semantics shared with redactors.
#[derive(Default)]
pub struct EnricherChain {
    enrichers: Vec<Box<dyn Enricher>>,
}

impl EnricherChain {
    pub fn new(enrichers: Vec<Box<dyn Enricher>>) -> Self {
        EnricherChain { enrichers }
    }

    pub async fn apply(&self, mut event: Envelope, on_error: &mut impl FnMut(StageError)) -> Envelope {
        for enricher in &self.enrichers {
            match enricher.enrich(&event).await {
                Ok(partial) => {
                    let mut diagnostics = crate::value::Value::Map(std::mem::take(&mut event.diagnostics));
                    diagnostics.deep_merge(crate::value::Value::Map(partial));
                    event.diagnostics = diagnostics.as_map().cloned().unwrap_or_default();
                }
                Err(err) => on_error(err),
            }
        }
        event
    }
}

/// An ordered chain of processors, applied after redaction.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        ProcessorChain { processors }
    }

    pub async fn apply(
        &self,
        mut event: Envelope,
        fail_mode: RedactionFailMode,
        on_error: &mut impl FnMut(StageError),
    ) -> Option<Envelope> {
        for processor in &self.processors {
            match processor.process(&event).await {
                Ok(next) => event = next,
                Err(err) => {
                    on_error(err);
                    if fail_mode == RedactionFailMode::Closed {
                        return None;
                    }
                    // Last-good snapshot (`event`) is untouched since
                    // `process` borrowed rather than consumed it.
                }
            }
        }
        Some(event)
    }
}
