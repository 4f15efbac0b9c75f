//! Bounded dual-lane priority queue, with a protected lane that can evict
//! standard-lane entries to make room rather than block or drop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::envelope::Envelope;

/// What to do when the queue is full at enqueue time.
#[derive(Debug, Clone, Copy)]
pub enum BackpressurePolicy {
    /// Drop immediately, count, diagnostic.
    DropOnFull,
    /// Wait up to `wait` for space to free via a signalled event; if still
    /// full, drop.
    BoundedWait { wait: Duration },
}

impl BackpressurePolicy {
    pub fn from_config(drop_on_full: bool, wait: Duration) -> Self {
        if drop_on_full {
            BackpressurePolicy::DropOnFull
        } else {
            BackpressurePolicy::BoundedWait { wait }
        }
    }
}

/// Why an enqueue did not result in the event landing in a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    AcceptedByEviction,
    DroppedPolicyFull,
    DroppedTimedOut,
    DroppedSyncReentrant,
}

impl EnqueueOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, EnqueueOutcome::Accepted | EnqueueOutcome::AcceptedByEviction)
    }
}

struct Slot {
    event: Envelope,
    dead: bool,
}

struct Lanes {
    protected: VecDeque<Slot>,
    standard: VecDeque<Slot>,
    capacity: usize,
    live_count: usize,
}

impl Lanes {
    fn total_len(&self) -> usize {
        self.live_count
    }

    fn is_full(&self) -> bool {
        self.total_len() >= self.capacity
    }

    fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.total_len() as f64 / self.capacity as f64
    }
}

/// Two bounded FIFO lanes sharing one capacity budget: a protected lane for
/// protected-level events and a standard lane for everything else. Capacity
/// reads are lock-protected; eviction is O(1) via tombstones.
pub struct DualQueue {
    lanes: Mutex<Lanes>,
    max_capacity: usize,
    space_available: Notify,
    evicted_total: std::sync::atomic::AtomicU64,
}

/// A dequeued batch: protected-lane events first, then standard-lane.
pub struct Batch {
    pub events: Vec<Envelope>,
}

impl DualQueue {
    pub fn new(base_capacity: usize, growth_factor: f64) -> Self {
        DualQueue {
            lanes: Mutex::new(Lanes {
                protected: VecDeque::new(),
                standard: VecDeque::new(),
                capacity: base_capacity,
                live_count: 0,
            }),
            max_capacity: ((base_capacity as f64) * growth_factor).ceil() as usize,
            space_available: Notify::new(),
            evicted_total: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lanes.lock().capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn fill_ratio(&self) -> f64 {
        self.lanes.lock().fill_ratio()
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Grow-only capacity expansion, clamped to `max_queue_size ×
    /// max_queue_growth`; once at that ceiling, further growth is a no-op.
    pub fn grow_capacity(&self, new_cap: usize) -> usize {
        let mut lanes = self.lanes.lock();
        let clamped = new_cap.min(self.max_capacity);
        if clamped > lanes.capacity {
            lanes.capacity = clamped;
        }
        lanes.capacity
    }

    /// Marks the oldest standard-lane slot dead, making room for an
    /// incoming protected event. Returns `true` if a victim was found.
    fn try_evict_for_protected(&self, lanes: &mut Lanes) -> bool {
        for slot in lanes.standard.iter_mut() {
            if !slot.dead {
                slot.dead = true;
                lanes.live_count -= 1;
                self.evicted_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    fn try_enqueue_once(&self, event: Envelope) -> Result<EnqueueOutcome, Envelope> {
        let protected = event.is_protected();
        let mut lanes = self.lanes.lock();
        if !lanes.is_full() {
            lanes.live_count += 1;
            if protected {
                lanes.protected.push_back(Slot { event, dead: false });
            } else {
                lanes.standard.push_back(Slot { event, dead: false });
            }
            return Ok(EnqueueOutcome::Accepted);
        }
        if protected && self.try_evict_for_protected(&mut lanes) {
            lanes.live_count += 1;
            lanes.protected.push_back(Slot { event, dead: false });
            return Ok(EnqueueOutcome::AcceptedByEviction);
        }
        Err(event)
    }

    /// Enqueues per the backpressure policy. Never blocks the caller
    /// longer than `policy`'s bounded wait.
    pub async fn enqueue(&self, event: Envelope, policy: BackpressurePolicy) -> EnqueueOutcome {
        let event = match self.try_enqueue_once(event) {
            Ok(outcome) => return outcome,
            Err(event) => event,
        };

        match policy {
            BackpressurePolicy::DropOnFull => EnqueueOutcome::DroppedPolicyFull,
            BackpressurePolicy::BoundedWait { wait } => {
                let deadline = Instant::now() + wait;
                let mut event = event;
                loop {
                    let now = Instant::now();
                    if now >= deadline {
                        return EnqueueOutcome::DroppedTimedOut;
                    }
                    let remaining = deadline - now;
                    let notified = self.space_available.notified();
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(remaining) => {
                            return EnqueueOutcome::DroppedTimedOut;
                        }
                    }
                    match self.try_enqueue_once(event) {
                        Ok(outcome) => return outcome,
                        Err(returned) => event = returned,
                    }
                }
            }
        }
    }

    /// Synchronous enqueue attempt used by the sync façade's worker-thread
    /// reentrancy guard, for the sync-from-worker-thread special case: never
    /// waits, drops immediately on contention.
    pub fn try_enqueue_sync(&self, event: Envelope) -> EnqueueOutcome {
        match self.try_enqueue_once(event) {
            Ok(outcome) => outcome,
            Err(_) => EnqueueOutcome::DroppedSyncReentrant,
        }
    }

    /// Drains up to `max_size` live events, protected lane first, skipping
    /// tombstones, or returns early on `timeout` if the batch is nonempty
    /// earlier events are present but the lane goes dry.
    pub async fn dequeue_batch(&self, max_size: usize, timeout: Duration) -> Batch {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::with_capacity(max_size);

        loop {
            {
                let mut lanes = self.lanes.lock();
                while events.len() < max_size {
                    if let Some(slot) = lanes.protected.pop_front() {
                        if slot.dead {
                            continue;
                        }
                        lanes.live_count -= 1;
                        events.push(slot.event);
                        continue;
                    }
                    break;
                }
                while events.len() < max_size {
                    if let Some(slot) = lanes.standard.pop_front() {
                        if slot.dead {
                            continue;
                        }
                        lanes.live_count -= 1;
                        events.push(slot.event);
                        continue;
                    }
                    break;
                }
            }
            self.space_available.notify_waiters();

            if events.len() >= max_size || !events.is_empty() {
                return Batch { events };
            }
            if Instant::now() >= deadline {
                return Batch { events };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(25))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeBuilder;
    use crate::level::LEVEL_REGISTRY;

    fn event(level_name: &str, msg: &str) -> Envelope {
        let level = LEVEL_REGISTRY.get(level_name).unwrap();
        EnvelopeBuilder::new(level, msg, "test").build()
    }

    #[tokio::test]
    async fn accepts_events_up_to_capacity_then_drops_on_full_policy() {
        let queue = DualQueue::new(2, 1.0);
        assert!(queue.enqueue(event("INFO", "a"), BackpressurePolicy::DropOnFull).await.accepted());
        assert!(queue.enqueue(event("INFO", "b"), BackpressurePolicy::DropOnFull).await.accepted());
        let outcome = queue.enqueue(event("INFO", "c"), BackpressurePolicy::DropOnFull).await;
        assert_eq!(outcome, EnqueueOutcome::DroppedPolicyFull);
    }

    #[tokio::test]
    async fn protected_event_evicts_oldest_standard_when_full() {
        let queue = DualQueue::new(2, 1.0);
        queue.enqueue(event("INFO", "a"), BackpressurePolicy::DropOnFull).await;
        queue.enqueue(event("INFO", "b"), BackpressurePolicy::DropOnFull).await;
        let outcome = queue.enqueue(event("ERROR", "critical"), BackpressurePolicy::DropOnFull).await;
        assert_eq!(outcome, EnqueueOutcome::AcceptedByEviction);
        assert_eq!(queue.evicted_total(), 1);

        let batch = queue.dequeue_batch(10, Duration::from_millis(10)).await;
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].level_name, "ERROR");
    }

    #[tokio::test]
    async fn dequeue_batch_drains_protected_lane_before_standard() {
        let queue = DualQueue::new(10, 1.0);
        queue.enqueue(event("INFO", "std-1"), BackpressurePolicy::DropOnFull).await;
        queue.enqueue(event("ERROR", "prot-1"), BackpressurePolicy::DropOnFull).await;
        queue.enqueue(event("INFO", "std-2"), BackpressurePolicy::DropOnFull).await;

        let batch = queue.dequeue_batch(10, Duration::from_millis(10)).await;
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.events[0].level_name, "ERROR");
    }

    #[tokio::test]
    async fn grow_capacity_is_clamped_to_max_and_never_shrinks() {
        let queue = DualQueue::new(10, 2.0);
        assert_eq!(queue.grow_capacity(15), 15);
        assert_eq!(queue.grow_capacity(100), 20);
        assert_eq!(queue.grow_capacity(5), 20);
    }

    #[tokio::test]
    async fn bounded_wait_drops_after_timeout_when_still_full() {
        let queue = DualQueue::new(1, 1.0);
        queue.enqueue(event("INFO", "a"), BackpressurePolicy::DropOnFull).await;
        let outcome = queue
            .enqueue(
                event("INFO", "b"),
                BackpressurePolicy::BoundedWait { wait: Duration::from_millis(30) },
            )
            .await;
        assert_eq!(outcome, EnqueueOutcome::DroppedTimedOut);
    }

    #[test]
    fn try_enqueue_sync_drops_immediately_when_full() {
        let queue = DualQueue::new(1, 1.0);
        assert_eq!(queue.try_enqueue_sync(event("INFO", "a")), EnqueueOutcome::Accepted);
        assert_eq!(
            queue.try_enqueue_sync(event("INFO", "b")),
            EnqueueOutcome::DroppedSyncReentrant
        );
    }
}
