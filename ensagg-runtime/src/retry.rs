use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

const MAX_SHIFT: u32 = 16;

/// Exponential backoff with deterministic jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `max`, then scaled into [80%, 120%] by a hash of
    /// `key` and `attempt` so concurrent retries for different objects spread out while
    /// the same object always waits the same amount.
    pub fn delay(&self, key: &str, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_SHIFT);
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let capped_ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        attempt.hash(&mut hasher);
        let jitter_percent = 80u64 + (hasher.finish() % 41);
        let jittered_ms = capped_ms.saturating_mul(jitter_percent) / 100;
        if capped_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(jittered_ms.max(1))
        }
    }
}
