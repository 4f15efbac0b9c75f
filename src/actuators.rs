//! Actuators: gated callbacks that mutate pipeline parameters on pressure
//! transitions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::pressure::{PressureLevel, Transition};

/// Independently-configurable gates; an actuator with its gate off is a
/// no-op on every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActuatorGates {
    pub worker_scaling: bool,
    pub queue_growth: bool,
    pub batch_sizing: bool,
    pub filter_tightening: bool,
}

impl ActuatorGates {
    pub fn all_enabled() -> Self {
        ActuatorGates {
            worker_scaling: true,
            queue_growth: true,
            batch_sizing: true,
            filter_tightening: true,
        }
    }
}

/// A pre-built, stricter-by-level filter tuple, swapped atomically on
/// pressure escalation. The concrete filter chain lives in
/// `pipeline::filter`; this is just the label the actuator swaps in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTightness {
    NoOp,
    Soft,
    Medium,
    Aggressive,
}

fn tightness_for_level(level: PressureLevel) -> FilterTightness {
    match level {
        PressureLevel::Normal => FilterTightness::NoOp,
        PressureLevel::Elevated => FilterTightness::Soft,
        PressureLevel::High => FilterTightness::Medium,
        PressureLevel::Critical => FilterTightness::Aggressive,
    }
}

/// Target worker count and queue-growth/batch-size multipliers, wired into
/// `WorkerPool` and `DualQueue` by the logger façade at construction.
pub struct ActuatorRegistry {
    gates: ActuatorGates,
    initial_workers: usize,
    max_workers: usize,
    base_queue_capacity: usize,
    max_queue_growth: f64,
    base_batch_size: usize,
    target_worker_count: Arc<AtomicUsize>,
    target_batch_size: Arc<AtomicUsize>,
    filter_tightness: Arc<ArcSwap<FilterTightness>>,
    queue: Arc<crate::queue::DualQueue>,
}

impl ActuatorRegistry {
    pub fn new(
        gates: ActuatorGates,
        initial_workers: usize,
        max_workers: usize,
        base_batch_size: usize,
        max_queue_growth: f64,
        queue: Arc<crate::queue::DualQueue>,
    ) -> Self {
        ActuatorRegistry {
            gates,
            initial_workers,
            max_workers,
            base_queue_capacity: queue.capacity(),
            max_queue_growth,
            base_batch_size,
            target_worker_count: Arc::new(AtomicUsize::new(initial_workers)),
            target_batch_size: Arc::new(AtomicUsize::new(base_batch_size)),
            filter_tightness: Arc::new(ArcSwap::from_pointee(FilterTightness::NoOp)),
            queue,
        }
    }

    pub fn target_worker_count(&self) -> usize {
        self.target_worker_count.load(Ordering::Acquire)
    }

    pub fn target_batch_size(&self) -> usize {
        self.target_batch_size.load(Ordering::Acquire)
    }

    pub fn current_filter_tightness(&self) -> FilterTightness {
        **self.filter_tightness.load()
    }

    /// The single entry point wired as the `PressureMonitor` actuator
    /// callback. Each actuator is independently gated and contained: a
    /// panic or bad multiplier in one never blocks the others.
    pub fn on_transition(&self, transition: Transition) {
        if self.gates.worker_scaling {
            self.scale_workers(transition.new_level);
        }
        if self.gates.queue_growth {
            self.grow_queue(transition.new_level);
        }
        if self.gates.batch_sizing {
            self.resize_batches(transition.new_level);
        }
        if self.gates.filter_tightening {
            self.tighten_filter(transition.new_level);
        }
    }

    fn scale_workers(&self, level: PressureLevel) {
        let target = match level {
            PressureLevel::Normal => self.initial_workers,
            PressureLevel::Elevated => self.initial_workers + 1,
            PressureLevel::High => self.initial_workers + 2,
            PressureLevel::Critical => self.max_workers,
        };
        self.target_worker_count.store(target.min(self.max_workers), Ordering::Release);
    }

    fn grow_queue(&self, level: PressureLevel) {
        let multiplier = match level {
            PressureLevel::Normal => 1.0,
            PressureLevel::Elevated => 1.0 + (self.max_queue_growth - 1.0) / 3.0,
            PressureLevel::High => 1.0 + (self.max_queue_growth - 1.0) * 2.0 / 3.0,
            PressureLevel::Critical => self.max_queue_growth,
        };
        let new_cap = (self.base_queue_capacity as f64 * multiplier).round() as usize;
        self.queue.grow_capacity(new_cap);
    }

    fn resize_batches(&self, level: PressureLevel) {
        let multiplier = match level {
            PressureLevel::Normal => 1.0,
            PressureLevel::Elevated => 1.5,
            PressureLevel::High => 2.0,
            PressureLevel::Critical => 4.0,
        };
        let new_size = (self.base_batch_size as f64 * multiplier).round() as usize;
        self.target_batch_size.store(new_size.max(1), Ordering::Release);
    }

    fn tighten_filter(&self, level: PressureLevel) {
        self.filter_tightness.store(Arc::new(tightness_for_level(level)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> ActuatorRegistry {
        let queue = Arc::new(crate::queue::DualQueue::new(100, 4.0));
        ActuatorRegistry::new(ActuatorGates::all_enabled(), 2, 8, 50, 4.0, queue)
    }

    #[test]
    fn worker_scaling_follows_the_spec_table() {
        let reg = registry();
        reg.on_transition(Transition { old_level: PressureLevel::Normal, new_level: PressureLevel::Elevated });
        assert_eq!(reg.target_worker_count(), 3);
        reg.on_transition(Transition { old_level: PressureLevel::Elevated, new_level: PressureLevel::High });
        assert_eq!(reg.target_worker_count(), 4);
        reg.on_transition(Transition { old_level: PressureLevel::High, new_level: PressureLevel::Critical });
        assert_eq!(reg.target_worker_count(), 8);
    }

    #[test]
    fn critical_queue_growth_reaches_full_growth_factor() {
        let reg = registry();
        reg.on_transition(Transition { old_level: PressureLevel::High, new_level: PressureLevel::Critical });
        assert_eq!(reg.queue.capacity(), 400);
    }

    #[test]
    fn filter_tightening_swaps_lock_free_snapshot() {
        let reg = registry();
        assert_eq!(reg.current_filter_tightness(), FilterTightness::NoOp);
        reg.on_transition(Transition { old_level: PressureLevel::Normal, new_level: PressureLevel::Critical });
        assert_eq!(reg.current_filter_tightness(), FilterTightness::Aggressive);
    }

    #[test]
    fn disabled_gate_leaves_parameter_untouched() {
        let queue = Arc::new(crate::queue::DualQueue::new(100, 4.0));
        let mut gates = ActuatorGates::all_enabled();
        gates.worker_scaling = false;
        let reg = ActuatorRegistry::new(gates, 2, 8, 50, 4.0, queue);
        reg.on_transition(Transition { old_level: PressureLevel::Normal, new_level: PressureLevel::Critical });
        assert_eq!(reg.target_worker_count(), 2);
    }
}
