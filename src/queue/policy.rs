//! Retry backoff and lease policy.
//!
//! Both are explicit, tested policies rather than incidental side effects of
//! storage TTLs. The defaults (1 minute base backoff capped at 1 hour, a
//! 5 minute lease) are inherited operating constants; they are configurable,
//! not load-bearing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// How long completed/failed items are retained before garbage collection.
pub const ITEM_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Exponential backoff for failed queue items.
///
/// The delay after the n-th failed attempt is `min(base * 2^(n-1), max)`:
/// 1 min, 2 min, 4 min, ... capped at 1 hour with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,

    /// Cap for exponential growth.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(60),
            max: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    /// Returns the delay before the next retry, given the number of failed
    /// attempts so far (1-indexed; 0 is treated as 1).
    pub fn delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        let scaled = self
            .base
            .as_secs()
            .saturating_mul(1u64 << exp);
        Duration::from_secs(scaled.min(self.max.as_secs()))
    }

    /// Returns the earliest time the item may be retried.
    pub fn retry_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        now + ChronoDuration::seconds(self.delay(attempts).as_secs() as i64)
    }
}

/// Everything the queue store needs to know about retries and leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub backoff: BackoffPolicy,
    pub lease: LeasePolicy,
    /// Attempt ceiling stamped onto new items.
    pub max_attempts: u32,
    /// Retention for items of any status.
    pub ttl: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy {
            backoff: BackoffPolicy::default(),
            lease: LeasePolicy::default(),
            max_attempts: 3,
            ttl: ITEM_TTL,
        }
    }
}

/// Time-bounded exclusive claim on a queue item.
///
/// The lease is optimistic: a worker that outlives its lease can have the
/// item stolen by another worker, so all downstream writes must be safe
/// under at-least-once delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// How long a lease is held before it may be stolen.
    pub duration: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        LeasePolicy {
            duration: Duration::from_secs(300),
        }
    }
}

impl LeasePolicy {
    /// Returns the lease expiry for a lease taken at `now`.
    pub fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + ChronoDuration::seconds(self.duration.as_secs() as i64)
    }
}
