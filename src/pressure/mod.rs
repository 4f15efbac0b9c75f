//! Pressure monitor and escalation state machine.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::queue::DualQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PressureLevel {
    Normal = 0,
    Elevated = 1,
    High = 2,
    Critical = 3,
}

impl PressureLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PressureLevel::Normal,
            1 => PressureLevel::Elevated,
            2 => PressureLevel::High,
            _ => PressureLevel::Critical,
        }
    }
}

/// One level's escalate/de-escalate thresholds on fill ratio.
#[derive(Debug, Clone, Copy)]
struct LevelThreshold {
    level: PressureLevel,
    escalate_at: f64,
    deescalate_below: f64,
}

/// The full threshold table. Validated at construction: escalate thresholds
/// must strictly increase with level, and each de-escalate threshold must be
/// below its matching escalate threshold.
#[derive(Debug, Clone)]
pub struct PressureThresholds {
    levels: [LevelThreshold; 3],
    pub circuit_pressure_boost: f64,
    pub cooldown: Duration,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        PressureThresholds {
            levels: [
                LevelThreshold { level: PressureLevel::Elevated, escalate_at: 0.60, deescalate_below: 0.40 },
                LevelThreshold { level: PressureLevel::High, escalate_at: 0.80, deescalate_below: 0.60 },
                LevelThreshold { level: PressureLevel::Critical, escalate_at: 0.92, deescalate_below: 0.75 },
            ],
            circuit_pressure_boost: 0.20,
            cooldown: Duration::from_secs(2),
        }
    }
}

impl PressureThresholds {
    /// Builds a threshold table from individual escalate/de-escalate ratios,
    /// as read off `AdaptiveConfig` by `config.rs`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_ratios(
        escalate_elevated: f64,
        deescalate_elevated: f64,
        escalate_high: f64,
        deescalate_high: f64,
        escalate_critical: f64,
        deescalate_critical: f64,
        circuit_pressure_boost: f64,
        cooldown: Duration,
    ) -> Self {
        PressureThresholds {
            levels: [
                LevelThreshold { level: PressureLevel::Elevated, escalate_at: escalate_elevated, deescalate_below: deescalate_elevated },
                LevelThreshold { level: PressureLevel::High, escalate_at: escalate_high, deescalate_below: deescalate_high },
                LevelThreshold { level: PressureLevel::Critical, escalate_at: escalate_critical, deescalate_below: deescalate_critical },
            ],
            circuit_pressure_boost,
            cooldown,
        }
    }

    /// Validates strictly-ascending escalation thresholds and that each
    /// level's de-escalation threshold sits strictly below its escalation
    /// threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pair in self.levels.windows(2) {
            if pair[0].escalate_at >= pair[1].escalate_at {
                return Err(ConfigError::InvalidThresholds(format!(
                    "escalation thresholds must be strictly ascending: {:?} >= {:?}",
                    pair[0], pair[1]
                )));
            }
        }
        for lvl in &self.levels {
            if lvl.deescalate_below >= lvl.escalate_at {
                return Err(ConfigError::InvalidThresholds(format!(
                    "de-escalation threshold must be strictly below escalation threshold for {:?}",
                    lvl
                )));
            }
        }
        Ok(())
    }

    fn next_level_up(&self, current: PressureLevel, effective_fill: f64) -> Option<PressureLevel> {
        for lvl in self.levels.iter().rev() {
            if lvl.level as u8 == current as u8 + 1 && effective_fill >= lvl.escalate_at {
                return Some(lvl.level);
            }
        }
        None
    }

    fn next_level_down(&self, current: PressureLevel, effective_fill: f64) -> Option<PressureLevel> {
        if current == PressureLevel::Normal {
            return None;
        }
        let current_threshold = self.levels.iter().find(|l| l.level == current)?;
        if effective_fill < current_threshold.deescalate_below {
            return Some(PressureLevel::from_u8(current as u8 - 1));
        }
        None
    }
}

/// A `(old, new)` pressure transition, passed to registered actuator
/// callbacks.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub old_level: PressureLevel,
    pub new_level: PressureLevel,
}

pub type ActuatorCallback = Arc<dyn Fn(Transition) + Send + Sync>;

#[derive(Default)]
struct PeakTracking {
    peak_level: AtomicU8,
    escalations: AtomicU64,
    deescalations: AtomicU64,
}

/// Aggregate counters surfaced in `DrainResult.adaptive`.
#[derive(Debug, Clone, Default)]
pub struct PressureSummary {
    pub peak_level: u8,
    pub escalations: u64,
    pub deescalations: u64,
}

struct StateMachine {
    current: AtomicU8,
    /// `None` until the first transition; the cooldown gates only the
    /// dwell time *between* transitions, not a freshly-started monitor.
    last_transition_at: Mutex<Option<Instant>>,
    tracking: PeakTracking,
}

/// Samples queue fill ratio + open-breaker count on a fixed cadence and
/// drives the pressure state machine, firing actuators on transitions that
/// clear the cooldown.
pub struct PressureMonitor {
    queue: Arc<DualQueue>,
    open_breaker_count: Arc<AtomicU64>,
    thresholds: PressureThresholds,
    state: StateMachine,
    callbacks: Mutex<Vec<ActuatorCallback>>,
    check_interval: Duration,
}

impl PressureMonitor {
    pub fn new(
        queue: Arc<DualQueue>,
        open_breaker_count: Arc<AtomicU64>,
        thresholds: PressureThresholds,
        check_interval: Duration,
    ) -> Result<Arc<Self>, ConfigError> {
        thresholds.validate()?;
        Ok(Arc::new(PressureMonitor {
            queue,
            open_breaker_count,
            thresholds,
            state: StateMachine {
                current: AtomicU8::new(PressureLevel::Normal as u8),
                last_transition_at: Mutex::new(None),
                tracking: PeakTracking::default(),
            },
            callbacks: Mutex::new(Vec::new()),
            check_interval,
        }))
    }

    pub fn current_level(&self) -> PressureLevel {
        PressureLevel::from_u8(self.state.current.load(Ordering::Acquire))
    }

    pub fn register_actuator(&self, callback: ActuatorCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn summary(&self) -> PressureSummary {
        PressureSummary {
            peak_level: self.state.tracking.peak_level.load(Ordering::Relaxed),
            escalations: self.state.tracking.escalations.load(Ordering::Relaxed),
            deescalations: self.state.tracking.deescalations.load(Ordering::Relaxed),
        }
    }

    fn effective_fill_ratio(&self) -> f64 {
        let base = self.queue.fill_ratio();
        let boost = self.open_breaker_count.load(Ordering::Relaxed) as f64
            * self.thresholds.circuit_pressure_boost;
        (base + boost).min(1.0)
    }

    /// One sampling tick: compute effective fill, apply at most one
    /// transition, and fire actuators if the cooldown has elapsed.
    fn sample(&self) {
        let effective = self.effective_fill_ratio();
        let current = self.current_level();

        let next = self
            .thresholds
            .next_level_up(current, effective)
            .or_else(|| self.thresholds.next_level_down(current, effective));

        let Some(next) = next else { return };
        if next == current {
            return;
        }

        let mut last = self.state.last_transition_at.lock();
        if let Some(at) = *last {
            if at.elapsed() < self.thresholds.cooldown {
                return;
            }
        }

        self.state.current.store(next as u8, Ordering::Release);
        *last = Some(Instant::now());
        drop(last);

        let peak = self.state.tracking.peak_level.load(Ordering::Relaxed);
        if next as u8 > peak {
            self.state.tracking.peak_level.store(next as u8, Ordering::Relaxed);
        }
        if next > current {
            self.state.tracking.escalations.fetch_add(1, Ordering::Relaxed);
            info!(?current, ?next, fill_ratio = effective, "pressure escalated");
        } else {
            self.state.tracking.deescalations.fetch_add(1, Ordering::Relaxed);
            info!(?current, ?next, fill_ratio = effective, "pressure de-escalated");
        }

        let transition = Transition { old_level: current, new_level: next };
        for cb in self.callbacks.lock().iter() {
            cb(transition);
        }
    }

    /// Spawns the sampling loop: a `tokio::time::interval` raced against a
    /// shutdown broadcast. Monitor failures never touch the data path — any
    /// panic inside `sample` is caught at the task boundary and logged.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(self.check_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.sample())) {
                                warn!(?panic, "pressure monitor sample panicked, continuing");
                            }
                        }
                        _ = shutdown.recv() => {
                            debug!("pressure monitor stopping");
                            break;
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("pressure_monitor")),
        )
    }
}

use tracing::Instrument;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_validate() {
        PressureThresholds::default().validate().unwrap();
    }

    #[test]
    fn non_ascending_escalation_thresholds_are_rejected() {
        let mut t = PressureThresholds::default();
        t.levels[1].escalate_at = t.levels[0].escalate_at;
        assert!(t.validate().is_err());
    }

    #[test]
    fn deescalation_at_or_above_escalation_is_rejected() {
        let mut t = PressureThresholds::default();
        t.levels[0].deescalate_below = t.levels[0].escalate_at;
        assert!(t.validate().is_err());
    }

    #[tokio::test]
    async fn sample_escalates_when_fill_ratio_crosses_threshold() {
        let queue = Arc::new(DualQueue::new(10, 1.0));
        for _ in 0..7 {
            queue
                .enqueue(
                    crate::envelope::EnvelopeBuilder::new(
                        crate::level::LEVEL_REGISTRY.get("INFO").unwrap(),
                        "m",
                        "l",
                    )
                    .build(),
                    crate::queue::BackpressurePolicy::DropOnFull,
                )
                .await;
        }
        let monitor = PressureMonitor::new(
            queue,
            Arc::new(AtomicU64::new(0)),
            PressureThresholds::default(),
            Duration::from_millis(10),
        )
        .unwrap();
        monitor.sample();
        assert_eq!(monitor.current_level(), PressureLevel::Elevated);
    }

    #[tokio::test]
    async fn cooldown_suppresses_a_second_transition_too_soon() {
        let queue = Arc::new(DualQueue::new(10, 1.0));
        for _ in 0..7 {
            queue
                .enqueue(
                    crate::envelope::EnvelopeBuilder::new(
                        crate::level::LEVEL_REGISTRY.get("INFO").unwrap(),
                        "m",
                        "l",
                    )
                    .build(),
                    crate::queue::BackpressurePolicy::DropOnFull,
                )
                .await;
        }
        let mut thresholds = PressureThresholds::default();
        thresholds.cooldown = Duration::from_secs(60);
        let monitor = PressureMonitor::new(queue, Arc::new(AtomicU64::new(0)), thresholds, Duration::from_millis(10)).unwrap();
        monitor.sample();
        assert_eq!(monitor.current_level(), PressureLevel::Elevated);
        monitor.sample();
        assert_eq!(monitor.current_level(), PressureLevel::Elevated);
    }
}
