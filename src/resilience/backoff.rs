use std::time::Duration;

/// Growth factor applied to the delay after every failed attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Capped exponential backoff: `initial`, `initial * 1.5`, ... up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; grows the delay for the following call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(BACKOFF_FACTOR).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How hard to retry a resource before declaring it lost.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures at which the condition becomes fatal.
    pub failure_threshold: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_delay: Duration, failure_threshold: u32) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay,
            failure_threshold,
        }
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_delay, self.max_delay)
    }
}
