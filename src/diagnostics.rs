//! Internal, rate-limited diagnostics channel. Every internal failure
//! funnels here; it never raises, and is a no-op when disabled.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    EventDropped { protected: bool, reason: String },
    EventEvicted { evicted_level: String },
    StageFailure { stage: String, plugin: String, reason: String },
    SinkFailure { sink: String, reason: String },
    BreakerTransition { sink: String, from: String, to: String },
    PressureTransition { from: String, to: String },
    MonitorPanic { detail: String },
    Custom { message: String, fields: serde_json::Value },
}

/// Where diagnostics are written. stderr by default; never the primary sink
/// chain.
pub trait DiagnosticsSink: Send + Sync {
    fn write_line(&self, line: &str);
}

pub struct StderrDiagnosticsSink;

impl DiagnosticsSink for StderrDiagnosticsSink {
    fn write_line(&self, line: &str) {
        eprintln!("{line}");
    }
}

/// Token-bucket rate limited channel. When `enabled = false`, `emit` is a
/// no-op.
pub struct DiagnosticsChannel {
    enabled: bool,
    limiter: Option<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
    sink: Arc<dyn DiagnosticsSink>,
    suppressed_total: std::sync::atomic::AtomicU64,
}

impl DiagnosticsChannel {
    pub fn new(enabled: bool, max_per_second: u32) -> Self {
        DiagnosticsChannel {
            enabled,
            limiter: NonZeroU32::new(max_per_second.max(1)).map(|n| RateLimiter::direct(Quota::per_second(n))),
            sink: Arc::new(StderrDiagnosticsSink),
            suppressed_total: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        if !self.enabled {
            return;
        }
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                self.suppressed_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return;
            }
        }
        let line = json!({
            "diagnostic": diagnostic,
            "emitted_at": chrono::Utc::now().to_rfc3339(),
        });
        if let Ok(text) = serde_json::to_string(&line) {
            self.sink.write_line(&text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingSink {
        lines: Mutex<Vec<String>>,
    }

    impl DiagnosticsSink for CapturingSink {
        fn write_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn disabled_channel_emits_nothing() {
        let sink = Arc::new(CapturingSink { lines: Mutex::new(vec![]) });
        let channel = DiagnosticsChannel::new(false, 100).with_sink(sink.clone());
        channel.emit(Diagnostic::EventDropped { protected: false, reason: "full".to_string() });
        assert!(sink.lines.lock().unwrap().is_empty());
    }

    #[test]
    fn rate_limiter_suppresses_bursts_beyond_quota() {
        let sink = Arc::new(CapturingSink { lines: Mutex::new(vec![]) });
        let channel = DiagnosticsChannel::new(true, 1).with_sink(sink.clone());
        channel.emit(Diagnostic::EventDropped { protected: false, reason: "a".to_string() });
        channel.emit(Diagnostic::EventDropped { protected: false, reason: "b".to_string() });
        assert_eq!(sink.lines.lock().unwrap().len(), 1);
        assert_eq!(channel.suppressed_total(), 1);
    }

    #[test]
    fn emitted_line_is_valid_json_with_diagnostic_kind() {
        let sink = Arc::new(CapturingSink { lines: Mutex::new(vec![]) });
        let channel = DiagnosticsChannel::new(true, 100).with_sink(sink.clone());
        channel.emit(Diagnostic::SinkFailure { sink: "primary".to_string(), reason: "timeout".to_string() });
        let lines = sink.lines.lock().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["diagnostic"]["kind"], "sink_failure");
    }
}
