//! Built-in enrichers: runtime info, context-vars, optional kubernetes.

use async_trait::async_trait;

use crate::context;
use crate::envelope::Envelope;
use crate::error::StageError;
use crate::pipeline::{Enricher, Plugin};
use crate::value::{Data, Value};

/// Adds process-wide runtime metadata: pid, hostname, crate version.
pub struct RuntimeInfoEnricher {
    hostname: String,
    pid: u32,
}

impl RuntimeInfoEnricher {
    pub fn new() -> Self {
        RuntimeInfoEnricher {
            hostname: hostname_or_unknown(),
            pid: std::process::id(),
        }
    }
}

impl Default for RuntimeInfoEnricher {
    fn default() -> Self {
        Self::new()
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[async_trait]
impl Plugin for RuntimeInfoEnricher {
    fn name(&self) -> &str {
        "runtime_info"
    }
    fn plugin_type(&self) -> &'static str {
        "enricher"
    }
}

#[async_trait]
impl Enricher for RuntimeInfoEnricher {
    async fn enrich(&self, _event: &Envelope) -> Result<Data, StageError> {
        let mut runtime = Data::new();
        runtime.insert("hostname".to_string(), Value::String(self.hostname.clone()));
        runtime.insert("pid".to_string(), Value::Int(self.pid as i64));
        runtime.insert("crate_version".to_string(), Value::String(env!("CARGO_PKG_VERSION").to_string()));
        let mut out = Data::new();
        out.insert("runtime".to_string(), Value::Map(runtime));
        Ok(out)
    }
}

/// Pulls fields from the ambient async-local context that weren't already
/// merged at envelope-build time (e.g. fields bound after construction by a
/// nested task), useful when a framework middleware enriches deeper in the
/// call tree than the logger call site.
pub struct ContextVarsEnricher;

#[async_trait]
impl Plugin for ContextVarsEnricher {
    fn name(&self) -> &str {
        "context_vars"
    }
    fn plugin_type(&self) -> &'static str {
        "enricher"
    }
}

#[async_trait]
impl Enricher for ContextVarsEnricher {
    async fn enrich(&self, _event: &Envelope) -> Result<Data, StageError> {
        let mut out = Data::new();
        if let Some(ctx) = context::current_context() {
            out.insert("context_vars".to_string(), Value::Map(ctx.as_map().clone()));
        }
        Ok(out)
    }
}

/// Adds kubernetes downward-API metadata when the corresponding env vars are
/// present; a no-op enrichment otherwise.
pub struct KubernetesEnricher;

#[async_trait]
impl Plugin for KubernetesEnricher {
    fn name(&self) -> &str {
        "kubernetes"
    }
    fn plugin_type(&self) -> &'static str {
        "enricher"
    }
}

#[async_trait]
impl Enricher for KubernetesEnricher {
    async fn enrich(&self, _event: &Envelope) -> Result<Data, StageError> {
        let mut k8s = Data::new();
        for (env_key, field) in [
            ("POD_NAME", "pod_name"),
            ("POD_NAMESPACE", "namespace"),
            ("NODE_NAME", "node_name"),
        ] {
            if let Ok(v) = std::env::var(env_key) {
                k8s.insert(field.to_string(), Value::String(v));
            }
        }
        let mut out = Data::new();
        if !k8s.is_empty() {
            out.insert("kubernetes".to_string(), Value::Map(k8s));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LEVEL_REGISTRY;

    fn event() -> Envelope {
        crate::envelope::EnvelopeBuilder::new(LEVEL_REGISTRY.get("INFO").unwrap(), "m", "t").build()
    }

    #[tokio::test]
    async fn runtime_info_enricher_adds_pid_and_hostname() {
        let enricher = RuntimeInfoEnricher::new();
        let out = enricher.enrich(&event()).await.unwrap();
        let runtime = out.get("runtime").unwrap().as_map().unwrap();
        assert!(runtime.contains_key("pid"));
        assert!(runtime.contains_key("hostname"));
    }

    #[tokio::test]
    async fn context_vars_enricher_is_empty_with_no_bound_context() {
        let enricher = ContextVarsEnricher;
        let out = enricher.enrich(&event()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn context_vars_enricher_surfaces_bound_async_local_context() {
        let enricher = ContextVarsEnricher;
        let ctx = context::LogContext::new().with("request_id", "r-9");
        context::with_context(ctx, async {
            let out = enricher.enrich(&event()).await.unwrap();
            let vars = out.get("context_vars").unwrap().as_map().unwrap();
            assert_eq!(vars.get("request_id").unwrap().as_str(), Some("r-9"));
        })
        .await;
    }
}
