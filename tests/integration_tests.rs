//! End-to-end tests exercising the full filter → enrich → redact → process →
//! serialize pipeline through the public `Logger` facade against an
//! in-memory sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flowlog::config::FlowlogConfig;
use flowlog::envelope::Envelope;
use flowlog::level::LEVEL_REGISTRY;
use flowlog::logger::{LogCall, LoggerBuilder};
use flowlog::pipeline::redact::{FieldMaskRedactor, RedactionGuardrails};
use flowlog::sink::{Sink, WriteOutcome};
use flowlog::value::Value;

struct RecordingSink {
    events: Mutex<Vec<Envelope>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(RecordingSink { events: Mutex::new(Vec::new()) })
    }

    fn snapshot(&self) -> Vec<Envelope> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn write(&self, event: &Envelope) -> WriteOutcome {
        self.events.lock().unwrap().push(event.clone());
        WriteOutcome::Ok
    }
}

struct FailingSink;

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn write(&self, _event: &Envelope) -> WriteOutcome {
        WriteOutcome::Err("simulated write failure".to_string())
    }
}

fn small_config() -> FlowlogConfig {
    FlowlogConfig::builder().max_queue_size(64).worker_count(1).build().unwrap()
}

#[tokio::test]
async fn events_above_threshold_reach_the_sink() {
    let sink = RecordingSink::new();
    let logger = LoggerBuilder::new("itest-threshold", small_config())
        .sink(sink.clone(), None)
        .build()
        .unwrap();
    logger.start().await;

    let info = LEVEL_REGISTRY.get("INFO").unwrap();
    for i in 0..5 {
        let call = LogCall::new().field("i", Value::Int(i));
        logger.log(info.clone(), "hello", call).await;
    }

    let result = logger.drain(Duration::from_secs(5)).await;
    assert_eq!(result.messages_drained, 5);
    assert_eq!(sink.snapshot().len(), 5);
}

#[tokio::test]
async fn redactor_masks_configured_field_before_it_reaches_the_sink() {
    let sink = RecordingSink::new();
    let redactor = FieldMaskRedactor::new(vec!["password".to_string()], true, RedactionGuardrails::default());
    let logger = LoggerBuilder::new("itest-redact", small_config())
        .sink(sink.clone(), None)
        .redactor(Box::new(redactor))
        .build()
        .unwrap();
    logger.start().await;

    let info = LEVEL_REGISTRY.get("INFO").unwrap();
    let call = LogCall::new().field("password", Value::String("hunter2".to_string()));
    logger.log(info, "login attempt", call).await;

    logger.drain(Duration::from_secs(5)).await;
    let events = sink.snapshot();
    assert_eq!(events.len(), 1);
    let masked = events[0].data.get("password").unwrap();
    assert_eq!(masked, &Value::String("***".to_string()));
}

#[tokio::test]
async fn bound_context_fields_propagate_onto_every_event() {
    let sink = RecordingSink::new();
    let logger = LoggerBuilder::new("itest-context", small_config())
        .sink(sink.clone(), None)
        .build()
        .unwrap();
    logger.start().await;

    logger.bind([("request_id".to_string(), Value::String("abc-123".to_string()))]);
    let info = LEVEL_REGISTRY.get("INFO").unwrap();
    logger.log(info, "handling request", LogCall::new()).await;

    logger.drain(Duration::from_secs(5)).await;
    let events = sink.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data.get("request_id").unwrap(), &Value::String("abc-123".to_string()));
}

#[tokio::test]
async fn drain_falls_back_to_stderr_when_the_only_configured_sink_fails() {
    let logger = LoggerBuilder::new("itest-fallback", small_config())
        .sink(Arc::new(FailingSink), None)
        .build()
        .unwrap();
    logger.start().await;

    let error = LEVEL_REGISTRY.get("ERROR").unwrap();
    logger.log(error, "will not reach the primary sink", LogCall::new()).await;

    let result = logger.drain(Duration::from_secs(5)).await;
    let failing = result.sinks.iter().find(|s| s.sink == "failing").unwrap();
    assert!(!failing.success);
}

#[tokio::test]
async fn drain_is_idempotent_and_returns_the_same_report() {
    let sink = RecordingSink::new();
    let logger = LoggerBuilder::new("itest-idempotent", small_config())
        .sink(sink.clone(), None)
        .build()
        .unwrap();
    logger.start().await;

    let info = LEVEL_REGISTRY.get("INFO").unwrap();
    logger.log(info, "one event", LogCall::new()).await;

    let first = logger.drain(Duration::from_secs(5)).await;
    let second = logger.drain(Duration::from_secs(5)).await;
    assert_eq!(first.messages_drained, second.messages_drained);
}

#[tokio::test]
async fn health_snapshot_reflects_submitted_and_dropped_counts() {
    let sink = RecordingSink::new();
    let logger = LoggerBuilder::new("itest-health", small_config())
        .sink(sink.clone(), None)
        .build()
        .unwrap();
    logger.start().await;

    let info = LEVEL_REGISTRY.get("INFO").unwrap();
    for i in 0..3 {
        let call = LogCall::new().field("i", Value::Int(i));
        logger.log(info.clone(), "tick", call).await;
    }

    logger.drain(Duration::from_secs(5)).await;
    let health = logger.check_health();
    assert_eq!(health.messages_submitted, 3);
}
