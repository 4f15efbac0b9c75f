//! Start/stop ordering and the graceful-drain result report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::pressure::{PressureMonitor, PressureSummary};
use crate::sink::SinkWriterGroup;
use crate::worker::{WorkerPool, WorkerPoolHandle};

#[derive(Debug, Clone)]
pub struct SinkDrainResult {
    pub sink: String,
    pub messages_written: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Report returned by `Logger::drain`. A second `drain()` call returns the
/// same value rather than re-running shutdown.
#[derive(Debug, Clone)]
pub struct DrainResult {
    pub messages_drained: u64,
    pub duration: Duration,
    pub timed_out: bool,
    pub sinks: Vec<SinkDrainResult>,
    pub errors: u64,
    pub adaptive: Option<PressureSummary>,
}

/// Owns the start/stop ordering of sinks, pool, and monitor (sinks start
/// first and stop last), and caches the drain result so repeated calls are
/// idempotent.
pub struct Lifecycle {
    sinks: Arc<SinkWriterGroup>,
    pool: Arc<WorkerPool>,
    monitor: Arc<PressureMonitor>,
    shutdown_tx: broadcast::Sender<()>,
    pool_handle: Mutex<Option<WorkerPoolHandle>>,
    started: AtomicBool,
    cached_result: Mutex<Option<Arc<DrainResult>>>,
}

impl Lifecycle {
    pub fn new(sinks: Arc<SinkWriterGroup>, pool: Arc<WorkerPool>, monitor: Arc<PressureMonitor>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Lifecycle {
            sinks,
            pool,
            monitor,
            shutdown_tx,
            pool_handle: Mutex::new(None),
            started: AtomicBool::new(false),
            cached_result: Mutex::new(None),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn pressure_level(&self) -> crate::pressure::PressureLevel {
        self.monitor.current_level()
    }

    /// Starts sinks, then the worker pool, then the pressure monitor, in
    /// that order. Idempotent: a second call is a no-op.
    pub async fn start(&self, initial_workers: usize) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sinks.start().await;
        let handle = self.pool.clone().spawn(initial_workers, self.shutdown_tx.subscribe());
        *self.pool_handle.lock() = Some(handle);
        self.monitor.clone().spawn(self.shutdown_tx.subscribe());
        info!("logger started");
    }

    /// Stops workers after their current batch (bounded by `timeout`), then
    /// the pressure monitor, then sinks; reports the outcome. Cached after
    /// the first call.
    pub async fn drain(&self, timeout: Duration) -> Arc<DrainResult> {
        if let Some(cached) = self.cached_result.lock().clone() {
            return cached;
        }

        let start = Instant::now();
        let handle = self.pool_handle.lock().take();
        let timed_out = match handle {
            Some(h) => h.stop_and_join(timeout).await,
            None => false,
        };
        let _ = self.shutdown_tx.send(());
        self.sinks.stop().await;

        let counters = self.sinks.counters();
        let mut sinks = Vec::new();
        let mut errors = 0u64;
        for name in self.sinks.sink_names() {
            let written = counters.written.get(name).copied().unwrap_or(0);
            let failed = counters.failed.get(name).copied().unwrap_or(0);
            errors += failed;
            sinks.push(SinkDrainResult {
                sink: name.clone(),
                messages_written: written,
                success: failed == 0,
                error_message: if failed > 0 { Some(format!("{failed} write failures")) } else { None },
            });
        }

        let result = Arc::new(DrainResult {
            messages_drained: self.pool.messages_drained(),
            duration: start.elapsed(),
            timed_out,
            sinks,
            errors,
            adaptive: Some(self.monitor.summary()),
        });
        *self.cached_result.lock() = Some(result.clone());
        info!(messages_drained = result.messages_drained, timed_out, "drain complete");
        result
    }
}
