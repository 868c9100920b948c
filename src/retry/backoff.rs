use std::time::Duration;

/// Wait duration before retry number `attempt` (1-based).
pub trait Backoff: Send + Sync {
    fn interval(&self, attempt: u32) -> Duration;
}

/// `min_retry_interval × attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub min_retry_interval: Duration,
}

impl LinearBackoff {
    pub fn new(min_retry_interval: Duration) -> Self {
        Self { min_retry_interval }
    }
}

impl Backoff for LinearBackoff {
    fn interval(&self, attempt: u32) -> Duration {
        self.min_retry_interval.saturating_mul(attempt)
    }
}

/// Doubling backoff starting at `base`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Backoff for ExponentialBackoff {
    fn interval(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let cap = self.max.max(self.base);
        let mut backoff = self.base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
            if backoff == cap {
                break;
            }
        }
        backoff.min(cap)
    }
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn interval(&self, attempt: u32) -> Duration {
        (**self).interval(attempt)
    }
}
