use std::time::Duration;

use crate::store::StoreError;

/// Bounded retry budget for one view update.
///
/// `max_attempts` counts whole read-modify-write cycles, the first one
/// included. Throttling is always retried after the store's suggested
/// delay; concurrency conflicts are retried only when `retry_conflicts`
/// is set, and then immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_conflicts: bool,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Sleep, then run the whole cycle again.
    RetryAfter(Duration),
    /// Run the whole cycle again right away.
    RetryNow,
    /// The error was retryable but the budget is spent.
    Exhausted,
    /// The error is not retryable.
    Fatal,
}

impl RetryPolicy {
    /// Retry throttling only. Used for the device view.
    pub fn throttling(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_conflicts: false,
        }
    }

    /// Retry throttling and concurrency conflicts from one shared budget.
    /// Used for the global view.
    pub fn optimistic(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_conflicts: true,
        }
    }

    pub(crate) fn decide(&self, attempt: u32, err: &StoreError) -> RetryDecision {
        let retryable = match err {
            StoreError::Throttled { .. } => true,
            StoreError::ConcurrencyConflict { .. } => self.retry_conflicts,
            _ => false,
        };

        if !retryable {
            RetryDecision::Fatal
        } else if attempt >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            match err.retry_after() {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::RetryNow,
            }
        }
    }
}
