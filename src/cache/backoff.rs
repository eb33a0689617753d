use std::time::Duration;
use tokio::time::Instant;

/// Exponential retry delay after consecutive fetch failures.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial_delay: Duration,
    factor: f64,
    max_delay: Duration,
    current_delay: Option<Duration>,
    retry_at: Option<Instant>,
    consecutive_failures: u32,
}

impl RetryBackoff {
    pub fn new(initial_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            factor: factor.max(1.0),
            max_delay: max_delay.max(initial_delay),
            current_delay: None,
            retry_at: None,
            consecutive_failures: 0,
        }
    }

    /// Record a failure observed at `now` and return the delay before the
    /// next attempt is allowed.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = match self.current_delay {
            None => self.initial_delay,
            Some(previous) => Duration::try_from_secs_f64(previous.as_secs_f64() * self.factor)
                .unwrap_or(self.max_delay)
                .min(self.max_delay),
        };

        self.current_delay = Some(delay);
        self.retry_at = now.checked_add(delay);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay
    }

    pub fn record_success(&mut self) {
        self.current_delay = None;
        self.retry_at = None;
        self.consecutive_failures = 0;
    }

    /// Whether a new attempt is allowed at `now`.
    pub fn allows_retry(&self, now: Instant) -> bool {
        match (self.current_delay, self.retry_at) {
            (None, _) => true,
            (Some(_), Some(retry_at)) => now >= retry_at,
            // `now + delay` overflowed
            (Some(_), None) => false,
        }
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
