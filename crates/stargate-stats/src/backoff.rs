use rand::Rng;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Capped exponential backoff that never gives up.
///
/// The first `max_attempts` consecutive failures wait `base_delay`,
/// `2 * base_delay`, `4 * base_delay` and so on, capped at `max_delay`.
/// Every further failure waits `long_wait` until a success resets the
/// sequence.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BackoffPolicy {
    #[builder(default = 3)]
    pub max_attempts: u32,
    #[builder(default = Duration::from_secs(1))]
    pub base_delay: Duration,
    #[builder(default = Duration::from_secs(8))]
    pub max_delay: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub long_wait: Duration,
    /// Adds up to 25% random jitter to the exponential delays.
    #[builder(default = true)]
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the `failures`-th consecutive failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        if failures > self.max_attempts {
            return self.long_wait;
        }

        let factor = 2u32.saturating_pow(failures - 1);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return capped;
        }
        let capped_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=capped_ms / 4);
        capped + Duration::from_millis(jitter)
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            failures: 0,
        }
    }
}

/// Failure counter driven by a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay_for(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
