// src/channel/backoff.rs

use std::time::Duration;

/// Exponential reconnect backoff: `min(base * 2^attempts, cap)`.
///
/// There is no attempt ceiling; the supervisor keeps reconnecting until the
/// tunnel is closed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    /// `cap` is raised to `base` if it is smaller.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before the reconnect that follows `attempts` earlier failures.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }
}
