//! The canonical event record (schema v1.1) and its builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::LogContext;
use crate::level::Level;
use crate::value::{Data, Value};

pub const SCHEMA_VERSION: &str = "1.1";

/// How the event entered the pipeline: produced directly by `flowlog`'s own
/// API, or bridged in from a foreign logging facade (e.g. `log`/`tracing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Native,
    StdlibBridge,
}

/// The immutable structured log record. Constructed only via
/// [`EnvelopeBuilder`] — never field-by-field elsewhere, so its invariants
/// hold by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: &'static str,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub level_name: String,
    pub level_priority: u8,
    pub message: String,
    pub logger_name: String,
    pub origin: Origin,
    pub context: Data,
    pub diagnostics: Data,
    pub data: Data,
}

impl Envelope {
    pub fn correlation_id(&self) -> Option<&str> {
        self.context.get("correlation_id").and_then(Value::as_str)
    }

    pub fn is_protected(&self) -> bool {
        crate::level::LEVEL_REGISTRY.is_protected(&self.level_name)
    }
}

/// Builds an [`Envelope`], applying its merge/masking rules. The only way to
/// produce an `Envelope`.
pub struct EnvelopeBuilder {
    level: Level,
    message: String,
    logger_name: String,
    origin: Origin,
    bound_context: LogContext,
    call_context: Option<LogContext>,
    bound_data: Data,
    fields: Data,
    data_kwarg: Option<Value>,
    sensitive_kwarg: Option<Value>,
}

impl EnvelopeBuilder {
    pub fn new(level: Level, message: impl Into<String>, logger_name: impl Into<String>) -> Self {
        EnvelopeBuilder {
            level,
            message: message.into(),
            logger_name: logger_name.into(),
            origin: Origin::Native,
            bound_context: LogContext::new(),
            call_context: None,
            bound_data: Data::new(),
            fields: Data::new(),
            data_kwarg: None,
            sensitive_kwarg: None,
        }
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn bound_context(mut self, ctx: LogContext) -> Self {
        self.bound_context = ctx;
        self
    }

    pub fn call_context(mut self, ctx: Option<LogContext>) -> Self {
        self.call_context = ctx;
        self
    }

    pub fn bound_data(mut self, data: Data) -> Self {
        self.bound_data = data;
        self
    }

    /// A single `key=value` kwarg from the call site.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The `data={...}` kwarg: flattened into `data`, not nested under
    /// `data.data`.
    pub fn data_kwarg(mut self, value: Value) -> Self {
        self.data_kwarg = Some(value);
        self
    }

    /// The `sensitive={...}` / `pii={...}` kwarg: masked recursively and
    /// placed at `data.sensitive` before the event is ever enqueued.
    pub fn sensitive_kwarg(mut self, value: Value) -> Self {
        self.sensitive_kwarg = Some(value);
        self
    }

    pub fn build(self) -> Envelope {
        let merged_context = self.bound_context.merge_from(
            &self.call_context.unwrap_or_default(),
        );

        let mut data = self.bound_data;
        if let Some(Value::Map(map)) = self.data_kwarg {
            for (k, v) in map {
                data.insert(k, v);
            }
        }
        // Explicit kwargs override `data` on key collision.
        for (k, v) in self.fields {
            data.insert(k, v);
        }
        if let Some(mut sensitive) = self.sensitive_kwarg {
            sensitive.mask_in_place();
            data.insert("sensitive".to_string(), sensitive);
        }

        Envelope {
            schema_version: SCHEMA_VERSION,
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level_name: self.level.name().to_string(),
            level_priority: self.level.priority(),
            message: self.message,
            logger_name: self.logger_name,
            origin: self.origin,
            context: merged_context.into_data(),
            diagnostics: Data::new(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LEVEL_REGISTRY;

    fn info() -> Level {
        LEVEL_REGISTRY.get("INFO").unwrap()
    }

    #[test]
    fn build_sets_required_fields_per_schema() {
        let env = EnvelopeBuilder::new(info(), "hello", "app.module").build();
        assert_eq!(env.schema_version, "1.1");
        assert!(!env.message_id.is_empty());
        assert_eq!(env.message, "hello");
        assert!(env.context.contains_key("correlation_id"));
    }

    #[test]
    fn data_kwarg_flattens_rather_than_nesting() {
        let data_kwarg: Value = serde_json::json!({"a": 1}).into();
        let env = EnvelopeBuilder::new(info(), "m", "l").data_kwarg(data_kwarg).build();
        assert_eq!(env.data.get("a"), Some(&Value::Int(1)));
        assert!(!env.data.contains_key("data"));
    }

    #[test]
    fn explicit_field_overrides_data_kwarg_on_collision() {
        let data_kwarg: Value = serde_json::json!({"a": 1}).into();
        let env = EnvelopeBuilder::new(info(), "m", "l")
            .data_kwarg(data_kwarg)
            .field("a", 2i64)
            .build();
        assert_eq!(env.data.get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn sensitive_kwarg_is_masked_before_build_returns() {
        let sensitive: Value = serde_json::json!({"ssn": "123-45-6789"}).into();
        let env = EnvelopeBuilder::new(info(), "m", "l").sensitive_kwarg(sensitive).build();
        let nested = env.data.get("sensitive").unwrap().as_map().unwrap();
        assert_eq!(nested.get("ssn").unwrap().as_str(), Some("***"));
    }

    #[test]
    fn call_context_overrides_bound_context_on_collision() {
        let bound = LogContext::new().with("user_id", "bound");
        let call = LogContext::new().with("user_id", "call");
        let env = EnvelopeBuilder::new(info(), "m", "l")
            .bound_context(bound)
            .call_context(Some(call))
            .build();
        assert_eq!(env.context.get("user_id").unwrap().as_str(), Some("call"));
    }
}
