/// Retry scheduling with capped exponential backoff
///
/// Classification of a failure as retryable or terminal rides on
/// `Error::is_retryable`; this module owns the schedule: how many attempts
/// a request gets and when the next one becomes eligible.

use std::time::Duration;

use relayq_core::{now_ms, QueuedRequest, RequestStatus};

/// Retry schedule for transient dispatch failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry budget, not counting the initial attempt
    pub max_attempts: u32,
    /// First backoff window in milliseconds
    pub initial_backoff_ms: u64,
    /// Ceiling for the backoff window in milliseconds
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive windows
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
        }
    }

    /// Every failure is terminal on the first attempt.
    pub fn no_retry() -> Self {
        Self::new(0, 0, 0, 1.0)
    }

    /// Short windows for tests and interactive tooling.
    pub fn fast() -> Self {
        Self::new(3, 10, 100, 2.0)
    }

    /// Backoff window before attempt `attempt` (0-indexed), capped.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let scaled =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(scaled.min(self.max_backoff_ms as f64) as u64)
    }

    /// True once a request with this many retries has spent its budget.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_attempts
    }

    /// Record a retryable failure on a request.
    ///
    /// Increments the retry count and either returns the request to Pending
    /// with a backoff-gated next attempt, or marks it terminally Failed once
    /// the budget is exhausted. Returns true if another attempt remains.
    pub fn schedule_retry(&self, request: &mut QueuedRequest, error: String) -> bool {
        request.metadata.retry_count += 1;
        request.metadata.last_error = Some(error);

        if self.is_exhausted(request.metadata.retry_count) {
            request.status = RequestStatus::Failed;
            request.metadata.next_attempt_at = None;
            return false;
        }

        let backoff = self.backoff_duration(request.metadata.retry_count - 1);
        request.status = RequestStatus::Pending;
        request.metadata.next_attempt_at = Some(now_ms() + backoff.as_millis() as i64);
        true
    }
}

impl Default for RetryPolicy {
    /// Capped exponential schedule: 500 ms base, factor 2, 30 s cap, 5 attempts.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}
