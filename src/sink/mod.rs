//! Sink contract and the writer group that fans events out to them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::envelope::Envelope;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Outcome of one `write` call: a plain `false` return and an explicit error
/// both signal failure; the error variant additionally carries a reason.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Ok,
    FalseReturn,
    Err(String),
}

impl WriteOutcome {
    fn is_failure(&self) -> bool {
        !matches!(self, WriteOutcome::Ok)
    }
}

/// The sink contract. Implementations must not swallow write failures
/// silently and must not block indefinitely — long I/O should carry an
/// internal timeout.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), String> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        Ok(())
    }

    async fn write(&self, event: &Envelope) -> WriteOutcome;

    /// When present, the serializer emits bytes once and every sink that
    /// implements this receives the same buffer, avoiding re-serialization.
    async fn write_serialized(&self, _bytes: &[u8]) -> Option<WriteOutcome> {
        None
    }

    async fn health_check(&self) -> Option<bool> {
        None
    }
}

/// `{levels, sinks}`: the first matching rule wins; if none match, every
/// sink in the group other than the configured fallback receives the
/// event directly.
pub struct RoutingRule {
    pub levels: HashSet<String>,
    pub sink_names: Vec<String>,
}

struct SinkEntry {
    sink: Arc<dyn Sink>,
    breaker: CircuitBreaker,
}

/// Keyword substrings scrubbed by the stderr fallback's minimal redaction
/// pass before writing: a key-name substring match over common secret key
/// names.
const MINIMAL_REDACT_KEY_SUBSTRINGS: &[&str] = &["password", "secret", "token", "ssn", "api_key", "credential"];

/// Built-in last-resort writer: always available, scrubs common secret-key
/// substrings, writes JSON lines to stderr.
pub struct StderrFallbackSink;

fn minimal_redact(mut value: crate::value::Value) -> crate::value::Value {
    if let crate::value::Value::Map(map) = &mut value {
        for (k, v) in map.iter_mut() {
            let lowered = k.to_lowercase();
            if MINIMAL_REDACT_KEY_SUBSTRINGS.iter().any(|needle| lowered.contains(needle)) {
                *v = crate::value::Value::String("***".to_string());
            } else {
                *v = minimal_redact(std::mem::replace(v, crate::value::Value::Null));
            }
        }
    }
    value
}

#[async_trait]
impl Sink for StderrFallbackSink {
    fn name(&self) -> &str {
        "stderr_fallback"
    }

    async fn write(&self, event: &Envelope) -> WriteOutcome {
        let mut scrubbed = event.clone();
        scrubbed.data = minimal_redact(crate::value::Value::Map(scrubbed.data))
            .as_map()
            .cloned()
            .unwrap_or_default();
        match serde_json::to_string(&scrubbed) {
            Ok(line) => {
                eprintln!("{line}");
                WriteOutcome::Ok
            }
            Err(e) => WriteOutcome::Err(e.to_string()),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SinkCounters {
    pub written: HashMap<String, u64>,
    pub failed: HashMap<String, u64>,
}

/// Holds the ordered sink list, optional routing table, per-sink circuit
/// breakers, and fallback routing; writes are issued concurrently up to
/// `sink_concurrency`.
pub struct SinkWriterGroup {
    sinks: HashMap<String, SinkEntry>,
    order: Vec<String>,
    routing: Vec<RoutingRule>,
    fallback_name: Option<String>,
    concurrency: Arc<Semaphore>,
    retry: RetryConfig,
    written_total: HashMap<String, AtomicU64>,
    failed_total: HashMap<String, AtomicU64>,
    open_breaker_count: Arc<AtomicU64>,
}

impl SinkWriterGroup {
    pub fn new(
        sinks: Vec<(Arc<dyn Sink>, CircuitBreakerConfig)>,
        routing: Vec<RoutingRule>,
        fallback_name: Option<String>,
        sink_concurrency: usize,
        retry: RetryConfig,
        open_breaker_count: Arc<AtomicU64>,
    ) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        let mut written_total = HashMap::new();
        let mut failed_total = HashMap::new();
        for (sink, breaker_config) in sinks {
            let name = sink.name().to_string();
            order.push(name.clone());
            written_total.insert(name.clone(), AtomicU64::new(0));
            failed_total.insert(name.clone(), AtomicU64::new(0));
            map.insert(name.clone(), SinkEntry { sink, breaker: CircuitBreaker::new(name, breaker_config) });
        }
        SinkWriterGroup {
            sinks: map,
            order,
            routing,
            fallback_name,
            concurrency: Arc::new(Semaphore::new(sink_concurrency.max(1))),
            retry,
            written_total,
            failed_total,
            open_breaker_count,
        }
    }

    pub async fn start(&self) {
        for name in &self.order {
            if let Some(entry) = self.sinks.get(name) {
                if let Err(e) = entry.sink.start().await {
                    warn!(sink = %name, error = %e, "sink start failed");
                }
            }
        }
    }

    pub async fn stop(&self) {
        for name in &self.order {
            if let Some(entry) = self.sinks.get(name) {
                if let Err(e) = entry.sink.stop().await {
                    warn!(sink = %name, error = %e, "sink stop failed");
                }
            }
        }
    }

    pub fn breaker_state(&self, name: &str) -> Option<CircuitState> {
        self.sinks.get(name).map(|e| e.breaker.state())
    }

    pub fn sink_names(&self) -> &[String] {
        &self.order
    }

    pub fn counters(&self) -> SinkCounters {
        let written = self.written_total.iter().map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed))).collect();
        let failed = self.failed_total.iter().map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed))).collect();
        SinkCounters { written, failed }
    }

    /// Targets for direct delivery. The fallback sink is excluded from the
    /// unrouted (no rule matched) fan-out set: it only ever receives an
    /// event via `route_to_fallback`, never as a direct fan-out target, so
    /// a primary failure can't deliver the same event to it twice. A
    /// routing rule that names the fallback sink explicitly still reaches
    /// it directly.
    fn route(&self, event: &Envelope) -> Vec<String> {
        for rule in &self.routing {
            if rule.levels.contains(&event.level_name) {
                return rule.sink_names.clone();
            }
        }
        match &self.fallback_name {
            Some(fallback) => self.order.iter().filter(|n| *n != fallback).cloned().collect(),
            None => self.order.clone(),
        }
    }

    fn recompute_open_breaker_count(&self) {
        let open = self.sinks.values().filter(|e| e.breaker.state() == CircuitState::Open).count();
        self.open_breaker_count.store(open as u64, Ordering::Relaxed);
    }

    async fn write_to_named_sink(&self, name: &str, event: &Envelope, serialized: Option<&[u8]>) {
        let Some(entry) = self.sinks.get(name) else { return };

        if !entry.breaker.allow_request() {
            debug!(sink = %name, "breaker open, skipping direct write");
            if self.fallback_name.is_none() {
                if let Some(c) = self.failed_total.get(name) {
                    c.fetch_add(1, Ordering::Relaxed);
                }
            }
            self.route_to_fallback(event, serialized).await;
            return;
        }

        let outcome = retry_with_backoff(&self.retry, || async {
            if let Some(bytes) = serialized {
                if let Some(outcome) = entry.sink.write_serialized(bytes).await {
                    return if outcome.is_failure() { Err(outcome) } else { Ok(()) };
                }
            }
            let outcome = entry.sink.write(event).await;
            if outcome.is_failure() {
                Err(outcome)
            } else {
                Ok(())
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                entry.breaker.record_success();
                if let Some(c) = self.written_total.get(name) {
                    c.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(reason) => {
                entry.breaker.record_failure();
                if let Some(c) = self.failed_total.get(name) {
                    c.fetch_add(1, Ordering::Relaxed);
                }
                warn!(sink = %name, ?reason, "sink write failed after retries");
                self.route_to_fallback(event, serialized).await;
            }
        }
        self.recompute_open_breaker_count();
    }

    /// Delivers to the configured fallback sink, or writes straight to
    /// stderr if the configured name isn't in the group. Callers with no
    /// fallback configured at all (`self.fallback_name` is `None`) must
    /// count the drop themselves before calling this, since there's
    /// nothing here to attribute it to.
    async fn route_to_fallback(&self, event: &Envelope, serialized: Option<&[u8]>) {
        let Some(fallback_name) = &self.fallback_name else {
            return;
        };
        if let Some(entry) = self.sinks.get(fallback_name) {
            let outcome = match serialized {
                Some(bytes) => match entry.sink.write_serialized(bytes).await {
                    Some(outcome) => outcome,
                    None => entry.sink.write(event).await,
                },
                None => entry.sink.write(event).await,
            };
            if outcome.is_failure() {
                warn!(sink = %fallback_name, "fallback sink write also failed");
            }
        } else {
            let stderr = StderrFallbackSink;
            stderr.write(event).await;
        }
    }

    /// Writes one event to every sink its route selects, concurrently up to
    /// `sink_concurrency`. Each write task holds its semaphore permit for
    /// its full duration so the bound is actually enforced.
    pub async fn write_event(&self, event: &Envelope, serialized: Option<&[u8]>) {
        let targets = self.route(event);
        let mut handles = Vec::with_capacity(targets.len());
        for name in targets {
            let sem = self.concurrency.clone();
            handles.push(async move {
                let Ok(_permit) = sem.acquire_owned().await else { return };
                self.write_to_named_sink(&name, event, serialized).await;
            });
        }
        futures::future::join_all(handles).await;
    }
}
