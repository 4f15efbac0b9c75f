//! Context propagation: the ambient `context` fields merged into every
//! envelope built on the current async task.

use std::collections::BTreeMap;

use tokio::task_local;

use crate::value::{Data, Value};

/// `{correlation_id, request_id, user_id, tenant_id, trace_id, span_id, ...}`.
/// Always present in the built envelope; individual fields may be absent
/// (serialized as `null`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogContext {
    fields: Data,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.fields.get("correlation_id").and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) {
        self.fields.remove(key);
    }

    pub fn merge_from(&self, other: &LogContext) -> LogContext {
        let mut merged = self.fields.clone();
        for (k, v) in &other.fields {
            merged.insert(k.clone(), v.clone());
        }
        LogContext { fields: merged }
    }

    pub fn into_data(mut self) -> Data {
        self.fields.entry("correlation_id".to_string()).or_insert(Value::Null);
        self.fields
    }

    pub fn as_map(&self) -> &Data {
        &self.fields
    }
}

impl From<BTreeMap<String, Value>> for LogContext {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        LogContext { fields }
    }
}

task_local! {
    /// The ambient context for the current async task tree, set by
    /// `Logger::with_context`.
    static CURRENT_CONTEXT: LogContext;
}

/// Runs `fut` with `ctx` installed as the current async-local context,
/// mirroring how request-scoped middleware would bind correlation/trace ids
/// for the duration of a request.
pub async fn with_context<F>(ctx: LogContext, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_CONTEXT.scope(ctx, fut).await
}

/// Reads the current async-local context, if any is bound on this task.
pub fn current_context() -> Option<LogContext> {
    CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_context_scopes_visibility_to_the_future() {
        assert!(current_context().is_none());
        let ctx = LogContext::new().with("request_id", "r-1");
        with_context(ctx, async {
            let seen = current_context().unwrap();
            assert_eq!(seen.as_map().get("request_id").unwrap().as_str(), Some("r-1"));
        })
        .await;
        assert!(current_context().is_none());
    }

    #[test]
    fn merge_from_lets_caller_context_override_bound_fields() {
        let bound = LogContext::new().with("tenant_id", "t-1").with("user_id", "u-1");
        let caller = LogContext::new().with("user_id", "u-2");
        let merged = bound.merge_from(&caller);
        assert_eq!(merged.as_map().get("tenant_id").unwrap().as_str(), Some("t-1"));
        assert_eq!(merged.as_map().get("user_id").unwrap().as_str(), Some("u-2"));
    }

    #[test]
    fn into_data_always_sets_correlation_id_key() {
        let ctx = LogContext::new();
        let data = ctx.into_data();
        assert!(data.contains_key("correlation_id"));
        assert_eq!(data.get("correlation_id"), Some(&Value::Null));
    }
}
