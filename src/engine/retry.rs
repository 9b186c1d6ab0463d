//! Escalating retry schedule for targets whose last check failed.

use crate::model::{RetryState, TargetId, TrackedTarget};
use chrono::{DateTime, Duration, Utc};

/// Automatic retries stop once this many have been scheduled.
pub const MAX_RETRIES: u32 = 5;

/// Delay before the next attempt, given how many retries already happened.
pub fn delay(retry_count: u32) -> Duration {
    match retry_count {
        0 => Duration::minutes(10),
        1 => Duration::minutes(30),
        2 => Duration::hours(1),
        3 => Duration::hours(3),
        4 => Duration::hours(6),
        _ => Duration::hours(24),
    }
}

impl RetryState {
    /// Record a failed check at `now` and schedule the next attempt.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        let next = now + delay(self.retry_count);
        self.last_failed_at = Some(now);
        self.next_retry_at = Some(next);
        self.retry_count = (self.retry_count + 1).min(MAX_RETRIES);
    }

    pub fn mark_success(&mut self) {
        *self = RetryState::default();
    }

    pub fn should_retry(&self, now: DateTime<Utc>) -> bool {
        self.last_failed_at.is_some()
            && self.retry_count < MAX_RETRIES
            && self.next_retry_at.is_some_and(|next| now >= next)
    }
}

/// The slice of a tracked target the retry loop needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryableTarget {
    id: TargetId,
    url: String,
    state: RetryState,
}

impl RetryableTarget {
    pub fn from_target(target: &TrackedTarget) -> Self {
        Self {
            id: target.id,
            url: target.url.clone(),
            state: target.retry.clone(),
        }
    }

    pub fn should_retry(&self, now: DateTime<Utc>) -> bool {
        self.state.should_retry(now)
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retry_count
    }
}

/// Active targets that are due for an automatic retry at `now`.
pub fn due(targets: &[TrackedTarget], now: DateTime<Utc>) -> Vec<RetryableTarget> {
    targets
        .iter()
        .filter(|t| t.active)
        .map(RetryableTarget::from_target)
        .filter(|t| t.should_retry(now))
        .collect()
}
