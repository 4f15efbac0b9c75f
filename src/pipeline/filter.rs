//! Built-in filters: level threshold, sampling, rate-limit, first-occurrence
//! dedup.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::envelope::Envelope;
use crate::pipeline::{Filter, Plugin};

/// Drops events below a configured priority threshold. This is also used
/// directly (not via the chain) as the logger façade's cached fast path,
/// since re-checking through the trait object on every call would cost a
/// vtable dispatch on the hottest path.
pub struct LevelFilter {
    threshold_priority: AtomicU64,
}

impl LevelFilter {
    pub fn new(threshold_priority: u8) -> Self {
        LevelFilter { threshold_priority: AtomicU64::new(threshold_priority as u64) }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold_priority.load(Ordering::Relaxed) as u8
    }

    pub fn set_threshold(&self, priority: u8) {
        self.threshold_priority.store(priority as u64, Ordering::Relaxed);
    }

    pub fn passes(&self, priority: u8) -> bool {
        priority as u64 >= self.threshold_priority.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Plugin for LevelFilter {
    fn name(&self) -> &str {
        "level"
    }
    fn plugin_type(&self) -> &'static str {
        "filter"
    }
}

#[async_trait]
impl Filter for LevelFilter {
    async fn filter(&self, event: Envelope) -> Option<Envelope> {
        if self.passes(event.level_priority) {
            Some(event)
        } else {
            None
        }
    }
}

/// Per-logger PRNG and cached sampling rate, applied as a uniform
/// keep-probability.
pub struct SamplingFilter {
    rate: f64,
    rng: Mutex<SmallRng>,
}

impl SamplingFilter {
    pub fn new(rate: f64) -> Self {
        SamplingFilter { rate: rate.clamp(0.0, 1.0), rng: Mutex::new(SmallRng::from_entropy()) }
    }

    /// Synchronous keep/drop decision, used directly by the logger façade's
    /// cached fast path to avoid a trait-object dispatch on the hot path.
    pub fn sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        self.rng.lock().gen::<f64>() < self.rate
    }
}

#[async_trait]
impl Plugin for SamplingFilter {
    fn name(&self) -> &str {
        "sampling"
    }
    fn plugin_type(&self) -> &'static str {
        "filter"
    }
}

#[async_trait]
impl Filter for SamplingFilter {
    async fn filter(&self, event: Envelope) -> Option<Envelope> {
        if self.rate >= 1.0 {
            return Some(event);
        }
        if self.rate <= 0.0 {
            return None;
        }
        let keep = self.rng.lock().gen::<f64>() < self.rate;
        if keep {
            Some(event)
        } else {
            None
        }
    }
}

/// Token-bucket rate limiting over outgoing events.
pub struct RateLimitFilter {
    limiter: RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

impl RateLimitFilter {
    pub fn new(events_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(events_per_second.max(1)).unwrap());
        RateLimitFilter { limiter: RateLimiter::direct(quota) }
    }
}

#[async_trait]
impl Plugin for RateLimitFilter {
    fn name(&self) -> &str {
        "rate_limit"
    }
    fn plugin_type(&self) -> &'static str {
        "filter"
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    async fn filter(&self, event: Envelope) -> Option<Envelope> {
        if self.limiter.check().is_ok() {
            Some(event)
        } else {
            None
        }
    }
}

/// First-occurrence dedup: suppresses repeats of the same `(level, message)`
/// within a window, using an in-process hash-set-with-expiry.
pub struct DedupFilter {
    window: Duration,
    seen: Mutex<HashMap<(u8, String), Instant>>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        DedupFilter { window, seen: Mutex::new(HashMap::new()) }
    }

    fn is_duplicate(&self, priority: u8, message: &str) -> bool {
        let key = (priority, message.to_string());
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        match seen.get(&key) {
            Some(_) => true,
            None => {
                seen.insert(key, now);
                false
            }
        }
    }
}

#[async_trait]
impl Plugin for DedupFilter {
    fn name(&self) -> &str {
        "dedup"
    }
    fn plugin_type(&self) -> &'static str {
        "filter"
    }
}

#[async_trait]
impl Filter for DedupFilter {
    async fn filter(&self, event: Envelope) -> Option<Envelope> {
        if self.is_duplicate(event.level_priority, &event.message) {
            None
        } else {
            Some(event)
        }
    }
}
