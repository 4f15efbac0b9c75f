//! Prometheus metric-recording interface.
//!
//! This module defines the recording *interface* and a default
//! `prometheus`-backed implementation; wiring it to an exporter's HTTP
//! endpoint is left to the embedding application.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec, IntCounterVec, IntGaugeVec,
};

pub static EVENTS_SUBMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("flowlog_events_submitted_total", "Events submitted to the logger façade", &["logger"])
        .expect("metric registration")
});

pub static EVENTS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("flowlog_events_dropped_total", "Events dropped before delivery", &["reason", "protected"])
        .expect("metric registration")
});

pub static EVENTS_EVICTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("flowlog_events_evicted_total", "Standard-lane events evicted for a protected event", &["level"])
        .expect("metric registration")
});

pub static EVENTS_DRAINED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("flowlog_events_drained_total", "Events successfully delivered", &["logger"])
        .expect("metric registration")
});

pub static SINK_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("flowlog_sink_errors_total", "Sink write failures", &["sink"]).expect("metric registration")
});

pub static SINK_WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("flowlog_sink_writes_total", "Successful sink writes", &["sink"]).expect("metric registration")
});

pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!("flowlog_queue_depth", "Current queue depth", &["lane"]).expect("metric registration")
});

pub static QUEUE_CAPACITY: Lazy<IntGaugeVec> =
    Lazy::new(|| register_int_gauge_vec!("flowlog_queue_capacity", "Current queue capacity", &["logger"]).expect("metric registration"));

pub static WORKER_COUNT: Lazy<IntGaugeVec> =
    Lazy::new(|| register_int_gauge_vec!("flowlog_worker_count", "Active worker count", &["logger"]).expect("metric registration"));

pub static PRESSURE_LEVEL: Lazy<IntGaugeVec> =
    Lazy::new(|| register_int_gauge_vec!("flowlog_pressure_level", "Current pressure level (0-3)", &["logger"]).expect("metric registration"));

pub static BREAKER_STATE: Lazy<IntGaugeVec> =
    Lazy::new(|| register_int_gauge_vec!("flowlog_breaker_state", "Breaker state (0=closed,1=half-open,2=open)", &["sink"]).expect("metric registration"));

pub static STAGE_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!("flowlog_stage_latency_seconds", "Per-stage processing latency", &["stage"]).expect("metric registration")
});

pub static BATCH_FLUSH_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!("flowlog_batch_flush_latency_seconds", "Per-batch flush latency", &["logger"]).expect("metric registration")
});

/// Drop-based latency recorder for one pipeline stage.
pub struct StageTimer {
    stage: &'static str,
    started: std::time::Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        StageTimer { stage, started: std::time::Instant::now() }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        STAGE_LATENCY_SECONDS.with_label_values(&[self.stage]).observe(self.started.elapsed().as_secs_f64());
    }
}

/// Snapshots the registered metrics as Prometheus text exposition format,
/// for an embedding application to serve however it likes (HTTP handler,
/// pull-based scrape, etc).
pub fn gather_metrics_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_timer_records_an_observation_on_drop() {
        let before = STAGE_LATENCY_SECONDS.with_label_values(&["test_stage"]).get_sample_count();
        {
            let _timer = StageTimer::start("test_stage");
        }
        let after = STAGE_LATENCY_SECONDS.with_label_values(&["test_stage"]).get_sample_count();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn gather_metrics_text_includes_registered_metric_names() {
        EVENTS_SUBMITTED_TOTAL.with_label_values(&["default"]).inc();
        let text = gather_metrics_text();
        assert!(text.contains("flowlog_events_submitted_total"));
    }
}
