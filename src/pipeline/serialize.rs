//! Canonical JSON serialization.

use async_trait::async_trait;
use serde::Serialize as SerdeSerialize;

use crate::envelope::Envelope;
use crate::error::SerializationError;
use crate::pipeline::{Plugin, Serializer};

/// A `serde` field-projection view matching the wire schema's stable key
/// order exactly, independent of `Envelope`'s Rust struct field order.
#[derive(SerdeSerialize)]
struct CanonicalEvent<'a> {
    schema_version: &'static str,
    message_id: &'a str,
    timestamp: String,
    level: &'a str,
    level_priority: u8,
    message: &'a str,
    logger_name: &'a str,
    origin: &'a str,
    context: &'a crate::value::Data,
    diagnostics: &'a crate::value::Data,
    data: &'a crate::value::Data,
}

fn to_canonical<'a>(event: &'a Envelope) -> CanonicalEvent<'a> {
    CanonicalEvent {
        schema_version: event.schema_version,
        message_id: &event.message_id,
        timestamp: event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        level: &event.level_name,
        level_priority: event.level_priority,
        message: &event.message,
        logger_name: &event.logger_name,
        origin: match event.origin {
            crate::envelope::Origin::Native => "native",
            crate::envelope::Origin::StdlibBridge => "stdlib-bridge",
        },
        context: &event.context,
        diagnostics: &event.diagnostics,
        data: &event.data,
    }
}

/// Produces compact, stable-key-order JSON bytes for one event.
pub struct CanonicalJsonSerializer;

#[async_trait]
impl Plugin for CanonicalJsonSerializer {
    fn name(&self) -> &str {
        "canonical_json"
    }
    fn plugin_type(&self) -> &'static str {
        "serializer"
    }
}

impl Serializer for CanonicalJsonSerializer {
    fn serialize(&self, event: &Envelope) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(&to_canonical(event)).map_err(SerializationError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LEVEL_REGISTRY;

    #[test]
    fn serializes_rfc3339_millisecond_timestamp_and_schema_version() {
        let event = crate::envelope::EnvelopeBuilder::new(LEVEL_REGISTRY.get("INFO").unwrap(), "hi", "t").build();
        let serializer = CanonicalJsonSerializer;
        let bytes = serializer.serialize(&event).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"schema_version\":\"1.1\""));
        assert!(text.contains("\"level\":\"INFO\""));
        assert!(text.ends_with('Z') || text.contains("Z\""));
    }

    #[test]
    fn field_order_is_stable_across_two_serializations() {
        let event = crate::envelope::EnvelopeBuilder::new(LEVEL_REGISTRY.get("INFO").unwrap(), "hi", "t").build();
        let serializer = CanonicalJsonSerializer;
        let a = serializer.serialize(&event).unwrap();
        let b = serializer.serialize(&event).unwrap();
        // message_id/timestamp differ between separately-built envelopes but
        // not here since we reuse the same `event`.
        assert_eq!(a, b);
    }
}
