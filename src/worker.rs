//! Worker pool: drains the queue in batches, runs pipeline stages, flushes
//! to sinks.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, instrument, Instrument};

use crate::actuators::ActuatorRegistry;
use crate::envelope::Envelope;
use crate::error::StageError;
use crate::pipeline::redact::RedactionChain;
use crate::pipeline::{EnricherChain, ProcessorChain, RedactionFailMode, Serializer, StrictEnvelopeMode};
use crate::queue::DualQueue;
use crate::sink::SinkWriterGroup;

/// Proportional controller over per-item flush latency measured with EWMA,
/// adjusting the target batch size within `[1, batch_max_size × growth]`.
pub struct BatchSizeController {
    ewma_latency_ms: parking_lot::Mutex<f64>,
    alpha: f64,
    base_size: usize,
    max_size: usize,
    current: AtomicUsize,
}

impl BatchSizeController {
    pub fn new(base_size: usize, max_size: usize) -> Self {
        BatchSizeController {
            ewma_latency_ms: parking_lot::Mutex::new(0.0),
            alpha: 0.2,
            base_size,
            max_size,
            current: AtomicUsize::new(base_size),
        }
    }

    pub fn target(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Call once per batch with the observed per-item flush latency.
    pub fn record(&self, per_item_latency: Duration) {
        let sample_ms = per_item_latency.as_secs_f64() * 1000.0;
        let mut ewma = self.ewma_latency_ms.lock();
        *ewma = if *ewma == 0.0 { sample_ms } else { self.alpha * sample_ms + (1.0 - self.alpha) * *ewma };
        let current = self.current.load(Ordering::Relaxed);
        // Faster (low latency) -> grow; slower -> shrink. Thresholds are
        // deliberately coarse: this is a damping control loop, not a
        // precise latency target.
        let next = if *ewma < 5.0 {
            (current + current / 4 + 1).min(self.max_size)
        } else if *ewma > 25.0 {
            (current.saturating_sub(current / 4)).max(1)
        } else {
            current
        };
        self.current.store(next, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.current.store(self.base_size, Ordering::Relaxed);
        *self.ewma_latency_ms.lock() = 0.0;
    }
}

/// Emitted for a dropped/failed stage so the logger façade's diagnostics
/// channel and metrics can be updated.
pub type StageErrorSink = Arc<dyn Fn(StageError) + Send + Sync>;

tokio::task_local! {
    /// Set for the duration of a worker task's run loop. The sync façade
    /// checks this to detect the worker-calling-itself cycle and drop
    /// immediately rather than block on its own queue.
    pub static IS_WORKER_TASK: bool;
}

pub struct WorkerPoolConfig {
    pub batch_timeout: Duration,
    pub sink_concurrency: usize,
    pub strict_envelope_mode: StrictEnvelopeMode,
    pub redaction_fail_mode: RedactionFailMode,
}

/// Owns the running worker tasks and the batch buffer exclusively.
pub struct WorkerPool {
    queue: Arc<DualQueue>,
    enrichers: Arc<EnricherChain>,
    redactors: Arc<RedactionChain>,
    processors: Arc<ProcessorChain>,
    serializer: Arc<dyn Serializer>,
    sinks: Arc<SinkWriterGroup>,
    actuators: Arc<ActuatorRegistry>,
    config: WorkerPoolConfig,
    batch_sizer: Arc<BatchSizeController>,
    messages_drained: Arc<AtomicU64>,
    on_stage_error: StageErrorSink,
    active_worker_count: Arc<AtomicUsize>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<DualQueue>,
        enrichers: Arc<EnricherChain>,
        redactors: Arc<RedactionChain>,
        processors: Arc<ProcessorChain>,
        serializer: Arc<dyn Serializer>,
        sinks: Arc<SinkWriterGroup>,
        actuators: Arc<ActuatorRegistry>,
        config: WorkerPoolConfig,
        batch_base_size: usize,
        batch_max_size: usize,
        on_stage_error: StageErrorSink,
    ) -> Self {
        WorkerPool {
            queue,
            enrichers,
            redactors,
            processors,
            serializer,
            sinks,
            actuators,
            config,
            batch_sizer: Arc::new(BatchSizeController::new(batch_base_size, batch_max_size)),
            messages_drained: Arc::new(AtomicU64::new(0)),
            on_stage_error,
            active_worker_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn messages_drained(&self) -> u64 {
        self.messages_drained.load(Ordering::Relaxed)
    }

    pub fn active_worker_count(&self) -> usize {
        self.active_worker_count.load(Ordering::Relaxed)
    }

    /// Prepare phase: enrich → redact → process → serialize, once per
    /// event. Returns `None` for events dropped outright (redaction-closed
    /// or strict-serialization failure).
    async fn prepare_one(&self, event: Envelope) -> Option<(Envelope, Option<Vec<u8>>)> {
        let on_error = self.on_stage_error.clone();
        let mut report = |e: StageError| (on_error)(e);

        let event = self.enrichers.apply(event, &mut report).await;
        let event = self.redactors.apply(event, self.config.redaction_fail_mode, &mut report).await?;
        let event = self.processors.apply(event, self.config.redaction_fail_mode, &mut report).await?;

        match self.serializer.serialize(&event) {
            Ok(bytes) => Some((event, Some(bytes))),
            Err(err) => {
                (self.on_stage_error)(StageError {
                    stage: crate::error::StageKind::Process,
                    plugin_name: "serializer".to_string(),
                    reason: err.to_string(),
                });
                match self.config.strict_envelope_mode {
                    StrictEnvelopeMode::Strict => None,
                    StrictEnvelopeMode::BestEffort => Some((event, None)),
                }
            }
        }
    }

    /// Write phase: fan out each prepared event to the sink group.
    async fn flush(&self, batch: Vec<Envelope>) {
        if batch.is_empty() {
            return;
        }
        let start = Instant::now();
        let count = batch.len();

        let mut prepared = Vec::with_capacity(count);
        for event in batch {
            if let Some(pair) = self.prepare_one(event).await {
                prepared.push(pair);
            }
        }

        for (event, serialized) in &prepared {
            self.sinks.write_event(event, serialized.as_deref()).await;
        }

        self.messages_drained.fetch_add(prepared.len() as u64, Ordering::Relaxed);

        let elapsed = start.elapsed();
        if count > 0 {
            self.batch_sizer.record(elapsed / count as u32);
        }
    }

    /// Runs one worker's consume loop until `stop_flag` is observed at a
    /// batch boundary. The pool never terminates a worker mid-batch.
    #[instrument(skip_all, fields(worker_id = worker_id))]
    async fn run_worker(self: Arc<Self>, worker_id: usize, stop_flag: Arc<AtomicBool>) {
        IS_WORKER_TASK
            .scope(true, async move {
                self.active_worker_count.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, "worker started");
                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    let batch_size = self.batch_sizer.target();
                    let batch = self.queue.dequeue_batch(batch_size, self.config.batch_timeout).await;
                    if batch.events.is_empty() && stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    self.flush(batch.events).await;
                }
                self.active_worker_count.fetch_sub(1, Ordering::Relaxed);
                debug!(worker_id, "worker stopped");
            })
            .await
    }

    /// Spawns `initial_workers` tasks and a scaling-supervisor task that
    /// grows/shrinks the live worker set to `actuators.target_worker_count()`
    /// on a light polling cadence, mirroring `pipeline/worker.rs`'s
    /// `Semaphore`-bounded concurrent-worker model but with dynamically
    /// addable/removable tasks instead of a fixed semaphore permit count.
    pub fn spawn(self: Arc<Self>, initial_workers: usize, mut shutdown: broadcast::Receiver<()>) -> WorkerPoolHandle {
        let mut stop_flags: Vec<Arc<AtomicBool>> = Vec::new();
        let mut handles = Vec::new();

        for id in 0..initial_workers {
            let stop_flag = Arc::new(AtomicBool::new(false));
            let pool = self.clone();
            let flag = stop_flag.clone();
            handles.push(tokio::spawn(pool.run_worker(id, flag).instrument(tracing::info_span!("worker", id))));
            stop_flags.push(stop_flag);
        }

        let pool = self.clone();
        let supervisor_stop_flags = stop_flags.clone();
        let supervisor = tokio::spawn(
            async move {
                let mut next_id = supervisor_stop_flags.len();
                let mut flags = supervisor_stop_flags;
                let mut extra_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();
                let mut ticker = tokio::time::interval(Duration::from_millis(200));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let target = pool.actuators.target_worker_count();
                            let live = flags.iter().filter(|f| !f.load(Ordering::Relaxed)).count();
                            if target > live {
                                for _ in 0..(target - live) {
                                    let stop_flag = Arc::new(AtomicBool::new(false));
                                    let p = pool.clone();
                                    let flag = stop_flag.clone();
                                    let id = next_id;
                                    next_id += 1;
                                    extra_handles.push(tokio::spawn(p.run_worker(id, flag).instrument(tracing::info_span!("worker", id))));
                                    flags.push(stop_flag);
                                }
                            } else if target < live {
                                let mut to_stop = live - target;
                                for flag in flags.iter() {
                                    if to_stop == 0 {
                                        break;
                                    }
                                    if !flag.load(Ordering::Relaxed) {
                                        flag.store(true, Ordering::Release);
                                        to_stop -= 1;
                                    }
                                }
                            }
                        }
                        _ = shutdown.recv() => {
                            for flag in &flags {
                                flag.store(true, Ordering::Release);
                            }
                            for h in extra_handles {
                                let _ = h.await;
                            }
                            break;
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("worker_pool_supervisor")),
        );

        WorkerPoolHandle { workers: handles, supervisor, stop_flags, pool: self }
    }
}

/// Handle used by `drain.rs` to stop the pool and join worker tasks.
pub struct WorkerPoolHandle {
    workers: Vec<tokio::task::JoinHandle<()>>,
    supervisor: tokio::task::JoinHandle<()>,
    stop_flags: Vec<Arc<AtomicBool>>,
    pool: Arc<WorkerPool>,
}

impl WorkerPoolHandle {
    pub fn messages_drained(&self) -> u64 {
        self.pool.messages_drained()
    }

    /// Signals all initial workers to stop after their current batch, then
    /// joins every worker task (initial-set only; the supervisor joins its
    /// own dynamically-added extras when it observes shutdown).
    pub async fn stop_and_join(self, deadline: Duration) -> bool {
        for flag in &self.stop_flags {
            flag.store(true, Ordering::Release);
        }
        let join_all = async {
            for handle in self.workers {
                let _ = handle.await;
            }
            let _ = self.supervisor.await;
        };
        tokio::time::timeout(deadline, join_all).await.is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_controller_grows_target_when_latency_is_low() {
        let controller = BatchSizeController::new(10, 100);
        for _ in 0..5 {
            controller.record(Duration::from_millis(1));
        }
        assert!(controller.target() > 10);
    }

    #[test]
    fn batch_size_controller_shrinks_target_when_latency_is_high() {
        let controller = BatchSizeController::new(40, 100);
        for _ in 0..5 {
            controller.record(Duration::from_millis(50));
        }
        assert!(controller.target() < 40);
    }

    #[test]
    fn batch_size_controller_never_drops_below_one() {
        let controller = BatchSizeController::new(2, 100);
        for _ in 0..20 {
            controller.record(Duration::from_millis(100));
        }
        assert!(controller.target() >= 1);
    }
}
