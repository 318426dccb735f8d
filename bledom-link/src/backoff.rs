//! Exponential backoff between connection attempts

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction (0.0..=1.0) of each delay that may be shaved off at random
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay before retry number `attempt` (0-based)
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Retry counter for one reconnect episode
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.policy.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        jittered(nominal, self.policy.jitter)
    }
}

// Jitter only ever shortens the delay so the cap holds.
fn jittered(nominal: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || nominal.is_zero() {
        return nominal;
    }
    let spread = nominal.mul_f64(jitter.min(1.0));
    let cut = rand::thread_rng().gen_range(0.0..=1.0);
    nominal.saturating_sub(spread.mul_f64(cut))
}
