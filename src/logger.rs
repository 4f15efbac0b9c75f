//! The public façade: `Logger`, its async/sync call entry points, and the
//! builder that wires every other module together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::actuators::{ActuatorGates, ActuatorRegistry};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::FlowlogConfig;
use crate::context::{self, LogContext};
use crate::diagnostics::{Diagnostic, DiagnosticsChannel};
use crate::drain::{DrainResult, Lifecycle};
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::error::ConfigError;
use crate::level::{Level, LEVEL_REGISTRY};
use crate::metrics;
use crate::pipeline::filter::{DedupFilter, LevelFilter, RateLimitFilter, SamplingFilter};
use crate::pipeline::redact::RedactionChain;
use crate::pipeline::{Enricher, EnricherChain, Processor, ProcessorChain, Redactor, Serializer};
use crate::pressure::PressureMonitor;
use crate::queue::{BackpressurePolicy, DualQueue, EnqueueOutcome};
use crate::sink::{RoutingRule, Sink, SinkWriterGroup};
use crate::value::{Data, Value};
use crate::worker::{WorkerPool, WorkerPoolConfig, IS_WORKER_TASK};

/// Suppresses repeat `(priority, message)` pairs for non-protected,
/// ERROR-or-above events within a window, emitting a suppression-count
/// summary when the window rolls over. Distinct from
/// `pipeline::filter::DedupFilter`, which runs inside the worker pool's
/// stage chain rather than at the call site.
struct ErrorDedup {
    window: Duration,
    seen: Mutex<HashMap<(u8, String), (Instant, u64)>>,
}

impl ErrorDedup {
    fn new(window: Duration) -> Self {
        ErrorDedup { window, seen: Mutex::new(HashMap::new()) }
    }

    /// `Some(summary)` when this call should be suppressed; the summary, if
    /// any, carries the number suppressed since the window last rolled.
    fn check(&self, priority: u8, message: &str) -> DedupOutcome {
        let key = (priority, message.to_string());
        let now = Instant::now();
        let mut seen = self.seen.lock();
        match seen.get_mut(&key) {
            Some((first_seen, count)) if now.duration_since(*first_seen) < self.window => {
                *count += 1;
                DedupOutcome::Suppress
            }
            Some((_, count)) => {
                let suppressed = *count;
                seen.insert(key, (now, 0));
                DedupOutcome::WindowRolled { suppressed }
            }
            None => {
                seen.insert(key, (now, 0));
                DedupOutcome::Admit
            }
        }
    }
}

enum DedupOutcome {
    Admit,
    Suppress,
    WindowRolled { suppressed: u64 },
}

/// One call site's worth of extra data, mirroring `EnvelopeBuilder`'s kwarg
/// shape so callers can build up a call without touching the builder
/// directly.
#[derive(Default)]
pub struct LogCall {
    fields: Data,
    data: Option<Value>,
    sensitive: Option<Value>,
}

impl LogCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn data(mut self, value: Value) -> Self {
        self.data = Some(value);
        self
    }

    pub fn sensitive(mut self, value: Value) -> Self {
        self.sensitive = Some(value);
        self
    }
}

/// The public logging façade. Cheap to clone (wraps `Arc`s internally where
/// it matters); typically held as `Arc<Logger>` behind the process-wide
/// cache.
pub struct Logger {
    name: String,
    level_filter: Arc<LevelFilter>,
    sampling: Arc<SamplingFilter>,
    error_dedup: ErrorDedup,
    bound_context: RwLock<LogContext>,
    queue: Arc<DualQueue>,
    backpressure_policy: BackpressurePolicy,
    lifecycle: Arc<Lifecycle>,
    diagnostics: Arc<DiagnosticsChannel>,
    messages_submitted: AtomicU64,
    messages_dropped_protected: AtomicU64,
    messages_dropped_unprotected: AtomicU64,
    runtime_handle: tokio::runtime::Handle,
    initial_workers: usize,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level_filter(&self) -> &LevelFilter {
        &self.level_filter
    }

    /// Starts the worker pool, sink group, and pressure monitor. Safe to
    /// call more than once; only the first call has effect.
    pub async fn start(&self) {
        self.lifecycle.start(self.initial_workers).await;
    }

    /// Builds and enqueues one event, applying the façade's fast-path
    /// filters before ever touching the queue.
    pub async fn log(&self, level: Level, message: impl Into<String>, call: LogCall) {
        let message = message.into();
        if !self.level_filter.passes(level.priority()) {
            return;
        }
        if !self.sampling.sample() {
            return;
        }

        let protected = LEVEL_REGISTRY.is_protected(level.name());
        let error_priority = LEVEL_REGISTRY.get(crate::level::ERROR).map(|l| l.priority()).unwrap_or(40);
        if !protected && level.priority() >= error_priority {
            match self.error_dedup.check(level.priority(), &message) {
                DedupOutcome::Suppress => return,
                DedupOutcome::WindowRolled { suppressed } if suppressed > 0 => {
                    self.diagnostics.emit(Diagnostic::Custom {
                        message: "error dedup window rolled".to_string(),
                        fields: serde_json::json!({ "suppressed": suppressed, "logger": self.name }),
                    });
                }
                _ => {}
            }
        }

        let envelope = self.build_envelope(level, message, call);
        self.enqueue(envelope, protected).await;
    }

    fn build_envelope(&self, level: Level, message: String, call: LogCall) -> Envelope {
        let mut builder = EnvelopeBuilder::new(level, message, self.name.clone())
            .bound_context(self.bound_context.read().clone())
            .call_context(context::current_context())
            .bound_data(Data::new());
        for (k, v) in call.fields {
            builder = builder.field(k, v);
        }
        if let Some(data) = call.data {
            builder = builder.data_kwarg(data);
        }
        if let Some(sensitive) = call.sensitive {
            builder = builder.sensitive_kwarg(sensitive);
        }
        builder.build()
    }

    async fn enqueue(&self, envelope: Envelope, protected: bool) {
        self.messages_submitted.fetch_add(1, Ordering::Relaxed);
        metrics::EVENTS_SUBMITTED_TOTAL.with_label_values(&[&self.name]).inc();
        let outcome = self.queue.enqueue(envelope, self.backpressure_policy).await;
        self.record_enqueue_outcome(outcome, protected);
    }

    fn record_enqueue_outcome(&self, outcome: EnqueueOutcome, protected: bool) {
        if outcome.accepted() {
            return;
        }
        if protected {
            self.messages_dropped_protected.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_dropped_unprotected.fetch_add(1, Ordering::Relaxed);
        }
        let reason = match outcome {
            EnqueueOutcome::DroppedPolicyFull => "policy_full",
            EnqueueOutcome::DroppedTimedOut => "timed_out",
            EnqueueOutcome::DroppedSyncReentrant => "sync_reentrant",
            _ => unreachable!("accepted outcomes returned above"),
        };
        metrics::EVENTS_DROPPED_TOTAL.with_label_values(&[reason, if protected { "true" } else { "false" }]).inc();
        self.diagnostics.emit(Diagnostic::EventDropped { protected, reason: reason.to_string() });
    }

    /// Synchronous entry point for call sites that cannot `.await`. Detects
    /// the worker-calling-itself cycle via `IS_WORKER_TASK` and drops
    /// immediately rather than block on the runtime handle in that case.
    pub fn log_sync(&self, level: Level, message: impl Into<String>, call: LogCall) {
        if !self.level_filter.passes(level.priority()) {
            return;
        }
        if !self.sampling.sample() {
            return;
        }
        let message = message.into();
        let protected = LEVEL_REGISTRY.is_protected(level.name());
        let envelope = self.build_envelope(level, message, call);

        let on_worker_task = IS_WORKER_TASK.try_with(|v| *v).unwrap_or(false);
        self.messages_submitted.fetch_add(1, Ordering::Relaxed);
        metrics::EVENTS_SUBMITTED_TOTAL.with_label_values(&[&self.name]).inc();

        let outcome = if on_worker_task {
            self.queue.try_enqueue_sync(envelope)
        } else {
            self.runtime_handle.block_on(self.queue.enqueue(envelope, self.backpressure_policy))
        };
        self.record_enqueue_outcome(outcome, protected);
    }

    pub fn bind(&self, fields: impl IntoIterator<Item = (String, Value)>) {
        let mut ctx = self.bound_context.write();
        for (k, v) in fields {
            ctx.set(k, v);
        }
    }

    pub fn unbind(&self, keys: impl IntoIterator<Item = &'static str>) {
        let mut ctx = self.bound_context.write();
        for k in keys {
            ctx.unset(k);
        }
    }

    pub fn clear_context(&self) {
        *self.bound_context.write() = LogContext::new();
    }

    /// Runs `fut` with `ctx` as the ambient async-local context for its
    /// duration (request-scoped correlation ids, trace ids, etc.).
    pub async fn with_context<F>(&self, ctx: LogContext, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        context::with_context(ctx, fut).await
    }

    /// Stops workers, the pressure monitor, and sinks, in that order, and
    /// reports the outcome. Idempotent: calling twice returns the same
    /// result rather than draining again.
    pub async fn drain(&self, timeout: Duration) -> Arc<DrainResult> {
        self.lifecycle.drain(timeout).await
    }

    pub fn messages_submitted(&self) -> u64 {
        self.messages_submitted.load(Ordering::Relaxed)
    }

    pub fn messages_dropped_protected(&self) -> u64 {
        self.messages_dropped_protected.load(Ordering::Relaxed)
    }

    pub fn messages_dropped_unprotected(&self) -> u64 {
        self.messages_dropped_unprotected.load(Ordering::Relaxed)
    }

    /// A coarse health snapshot: current pressure level and whether any sink
    /// breaker is open. Intended for an embedding application's own health
    /// endpoint, not exposed over the wire by this crate.
    pub fn check_health(&self) -> HealthSnapshot {
        HealthSnapshot {
            pressure_level: self.lifecycle.pressure_level(),
            queue_fill_ratio: self.queue.fill_ratio(),
            messages_submitted: self.messages_submitted(),
            messages_dropped_protected: self.messages_dropped_protected(),
            messages_dropped_unprotected: self.messages_dropped_unprotected(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub pressure_level: crate::pressure::PressureLevel,
    pub queue_fill_ratio: f64,
    pub messages_submitted: u64,
    pub messages_dropped_protected: u64,
    pub messages_dropped_unprotected: u64,
}

static LOGGER_CACHE: Lazy<Mutex<HashMap<String, Arc<Logger>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Assembles a [`Logger`] from a [`FlowlogConfig`] plus caller-supplied
/// plugins and sinks.
pub struct LoggerBuilder {
    name: String,
    config: FlowlogConfig,
    enrichers: Vec<Box<dyn Enricher>>,
    redactors: Vec<Box<dyn Redactor>>,
    processors: Vec<Box<dyn Processor>>,
    serializer: Option<Arc<dyn Serializer>>,
    sinks: Vec<(Arc<dyn Sink>, Option<CircuitBreakerConfig>)>,
    routing: Vec<RoutingRule>,
    rate_limit_filter: Option<u32>,
    dedup_filter_window: Option<Duration>,
    reuse: bool,
}

impl LoggerBuilder {
    pub fn new(name: impl Into<String>, config: FlowlogConfig) -> Self {
        LoggerBuilder {
            name: name.into(),
            config,
            enrichers: Vec::new(),
            redactors: Vec::new(),
            processors: Vec::new(),
            serializer: None,
            sinks: Vec::new(),
            routing: Vec::new(),
            rate_limit_filter: None,
            dedup_filter_window: None,
            reuse: true,
        }
    }

    pub fn enricher(mut self, enricher: Box<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn redactor(mut self, redactor: Box<dyn Redactor>) -> Self {
        self.redactors.push(redactor);
        self
    }

    pub fn processor(mut self, processor: Box<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>, breaker: Option<CircuitBreakerConfig>) -> Self {
        self.sinks.push((sink, breaker));
        self
    }

    pub fn routing_rule(mut self, rule: RoutingRule) -> Self {
        self.routing.push(rule);
        self
    }

    pub fn rate_limit(mut self, events_per_second: u32) -> Self {
        self.rate_limit_filter = Some(events_per_second);
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_filter_window = Some(window);
        self
    }

    /// When `false`, the built logger is not inserted into the process-wide
    /// cache keyed by name.
    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn build(self) -> Result<Arc<Logger>, ConfigError> {
        if self.reuse {
            if let Some(existing) = LOGGER_CACHE.lock().get(&self.name) {
                return Ok(existing.clone());
            }
        }

        LEVEL_REGISTRY.set_protected(self.config.protected_levels());
        LEVEL_REGISTRY.freeze();

        let core = &self.config.core;
        let queue = Arc::new(DualQueue::new(core.max_queue_size, core.max_queue_growth));

        let actuators = Arc::new(ActuatorRegistry::new(
            ActuatorGates::all_enabled(),
            core.worker_count,
            core.max_workers,
            core.batch_base_size,
            core.max_queue_growth,
            queue.clone(),
        ));

        let thresholds = self.config.pressure_thresholds()?;
        let open_breaker_count = Arc::new(AtomicU64::new(0));
        let monitor = PressureMonitor::new(
            queue.clone(),
            open_breaker_count.clone(),
            thresholds,
            Duration::from_millis(core.pressure_check_interval_ms),
        )?;

        let actuators_for_callback = actuators.clone();
        monitor.register_actuator(Arc::new(move |t| actuators_for_callback.on_transition(t)));
        let name_for_metrics = self.name.clone();
        monitor.register_actuator(Arc::new(move |t| {
            metrics::PRESSURE_LEVEL.with_label_values(&[&name_for_metrics]).set(t.new_level as i64);
        }));

        let mut sinks = self.sinks;
        if !sinks.iter().any(|(s, _)| s.name() == "stderr_fallback") {
            sinks.push((Arc::new(crate::sink::StderrFallbackSink), None));
        }
        let sink_entries = sinks
            .into_iter()
            .map(|(sink, breaker)| (sink, breaker.unwrap_or_else(|| CircuitBreakerConfig { failure_threshold: self.config.sink_config.failure_threshold, open_duration: Duration::from_secs_f64(self.config.sink_config.recovery_timeout_seconds), ..CircuitBreakerConfig::default() })))
            .collect();

        let sink_group = Arc::new(SinkWriterGroup::new(
            sink_entries,
            self.routing,
            self.config.sink_config.fallback_sink_name.clone(),
            core.sink_concurrency,
            self.config.retry_config(),
            open_breaker_count,
        ));

        let mut enrichers = self.enrichers;
        enrichers.push(Box::new(crate::pipeline::enrich::RuntimeInfoEnricher::new()));
        enrichers.push(Box::new(crate::pipeline::enrich::ContextVarsEnricher));

        let mut processors = self.processors;
        processors.push(Box::new(crate::pipeline::process::SizeGuardProcessor::new(1_000_000)));

        let serializer = self.serializer.unwrap_or_else(|| Arc::new(crate::pipeline::serialize::CanonicalJsonSerializer));

        let name_for_errors = self.name.clone();
        let on_stage_error: crate::worker::StageErrorSink = Arc::new(move |e| {
            warn!(logger = %name_for_errors, stage = %e.stage, plugin = %e.plugin_name, reason = %e.reason, "stage error");
        });

        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            Arc::new(EnricherChain::new(enrichers)),
            Arc::new(RedactionChain::new(self.redactors)),
            Arc::new(ProcessorChain::new(processors)),
            serializer,
            sink_group.clone(),
            actuators.clone(),
            WorkerPoolConfig {
                batch_timeout: Duration::from_secs_f64(core.batch_timeout_seconds),
                sink_concurrency: core.sink_concurrency,
                strict_envelope_mode: self.config.strict_envelope_mode(),
                redaction_fail_mode: self.config.redaction_fail_mode(),
            },
            core.batch_base_size,
            core.batch_max_size,
            on_stage_error,
        ));

        let lifecycle = Arc::new(Lifecycle::new(sink_group, pool, monitor));

        let level_filter = Arc::new(LevelFilter::new(LEVEL_REGISTRY.get(crate::level::INFO).map(|l| l.priority()).unwrap_or(20)));
        let sampling = Arc::new(SamplingFilter::new(self.config.filter_config.sampling_rate));

        let runtime_handle = tokio::runtime::Handle::try_current().unwrap_or_else(|_| {
            debug!("no ambient tokio runtime found at Logger construction; sync façade will require one at call time");
            tokio::runtime::Handle::current()
        });

        let logger = Arc::new(Logger {
            name: self.name.clone(),
            level_filter,
            sampling,
            error_dedup: ErrorDedup::new(Duration::from_secs_f64(core.error_dedupe_window_seconds)),
            bound_context: RwLock::new(LogContext::new()),
            queue,
            backpressure_policy: BackpressurePolicy::from_config(core.drop_on_full, Duration::from_millis(core.backpressure_wait_ms)),
            lifecycle,
            diagnostics: Arc::new(DiagnosticsChannel::new(true, 50)),
            messages_submitted: AtomicU64::new(0),
            messages_dropped_protected: AtomicU64::new(0),
            messages_dropped_unprotected: AtomicU64::new(0),
            runtime_handle,
            initial_workers: core.worker_count,
        });

        if self.reuse {
            LOGGER_CACHE.lock().insert(self.name.clone(), logger.clone());
        }

        // These two filters aren't part of the built-in plugin chain above;
        // they're mentioned here only to document that rate limiting and
        // dedup are available as worker-pool filters via `FilterChain`, not
        // as part of the façade fast path. Left unused until a caller wires
        // a `FilterChain` in front of the queue explicitly.
        let _ = (self.rate_limit_filter.map(RateLimitFilter::new), self.dedup_filter_window.map(DedupFilter::new));

        Ok(logger)
    }
}

/// Removes a logger from the process-wide cache; used by tests and by
/// callers that want a fresh instance for the same name.
pub fn forget_logger(name: &str) {
    LOGGER_CACHE.lock().remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LEVEL_REGISTRY;

    fn test_config() -> FlowlogConfig {
        FlowlogConfig::builder().max_queue_size(64).worker_count(1).build().unwrap()
    }

    #[tokio::test]
    async fn build_start_log_and_drain_round_trip() {
        let name = format!("test-logger-{:p}", &0usize as *const _);
        let logger = LoggerBuilder::new(name, test_config()).reuse(false).build().unwrap();
        logger.start().await;
        logger.log(LEVEL_REGISTRY.get("INFO").unwrap(), "hello", LogCall::new().field("x", 1i64)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = logger.drain(Duration::from_secs(1)).await;
        assert!(result.messages_drained >= 1 || !result.timed_out);
    }

    #[tokio::test]
    async fn drain_called_twice_is_idempotent() {
        let name = format!("test-logger-idem-{:p}", &1usize as *const _);
        let logger = LoggerBuilder::new(name, test_config()).reuse(false).build().unwrap();
        logger.start().await;
        let first = logger.drain(Duration::from_secs(1)).await;
        let second = logger.drain(Duration::from_secs(1)).await;
        assert_eq!(first.messages_drained, second.messages_drained);
    }

    #[tokio::test]
    async fn bind_and_unbind_affect_built_envelopes() {
        let name = format!("test-logger-bind-{:p}", &2usize as *const _);
        let logger = LoggerBuilder::new(name, test_config()).reuse(false).build().unwrap();
        logger.bind([("tenant_id".to_string(), Value::String("acme".to_string()))]);
        let env = logger.build_envelope(LEVEL_REGISTRY.get("INFO").unwrap(), "m".to_string(), LogCall::new());
        assert_eq!(env.context.get("tenant_id").unwrap().as_str(), Some("acme"));
        logger.unbind(["tenant_id"]);
        let env = logger.build_envelope(LEVEL_REGISTRY.get("INFO").unwrap(), "m".to_string(), LogCall::new());
        assert!(env.context.get("tenant_id").is_none());
    }

    #[tokio::test]
    async fn identical_info_messages_are_not_deduped() {
        let name = format!("test-logger-info-dedup-{:p}", &3usize as *const _);
        let logger = LoggerBuilder::new(name, test_config()).reuse(false).build().unwrap();
        logger.start().await;
        logger.log(LEVEL_REGISTRY.get("INFO").unwrap(), "same", LogCall::new()).await;
        logger.log(LEVEL_REGISTRY.get("INFO").unwrap(), "same", LogCall::new()).await;
        assert_eq!(logger.messages_submitted(), 2);
    }

    #[test]
    fn error_dedup_suppresses_then_rolls_over() {
        let dedup = ErrorDedup::new(Duration::from_millis(20));
        assert!(matches!(dedup.check(40, "boom"), DedupOutcome::Admit));
        assert!(matches!(dedup.check(40, "boom"), DedupOutcome::Suppress));
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(dedup.check(40, "boom"), DedupOutcome::WindowRolled { .. }));
    }
}
