//! The durable unit of work: one queued webhook awaiting processing.
//!
//! A queue item moves through `pending → processing → completed` on the happy
//! path. Failure sets `failed` plus a `process_after` in the future; `failed`
//! is NOT terminal — the item becomes eligible again once its backoff elapses,
//! until `max_attempts` is exhausted and the caller treats it as dead-letter.
//!
//! # Eligibility Invariant
//!
//! An item may be handed to a worker only when:
//!
//! ```text
//! (status == pending || (status == failed && attempts < max_attempts))
//!   && process_after <= now
//!   && (locked_until is None || locked_until <= now)
//! ```
//!
//! The lease (`locked_until`) is a time-bounded claim, not a held lock: a
//! crashed worker's lease simply expires, after which another worker may
//! steal the item. Processors are therefore written for at-least-once
//! delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::router::{Priority, QueueName};
use crate::types::{Tenant, WebhookId};

/// Opaque storage ID for a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub String);

impl QueueItemId {
    /// Generates a fresh item ID.
    pub fn generate() -> Self {
        QueueItemId(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be leased.
    Pending,
    /// Currently leased by a worker.
    Processing,
    /// Successfully processed; retained until TTL expiry.
    Completed,
    /// Last attempt failed; retried after `process_after` unless attempts
    /// are exhausted.
    Failed,
}

/// A new item to enqueue. The store assigns the ID and bookkeeping fields.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub queue: QueueName,
    pub priority: Priority,
    pub payload: Value,
    pub tenant: Tenant,
    pub received_at: DateTime<Utc>,
}

/// One durable work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,

    /// Unique per tenant + fingerprint for the retention window; the queue
    /// store enforces at most one live item per webhook ID.
    pub webhook_id: WebhookId,

    pub event_type: String,
    pub queue: QueueName,
    pub priority: Priority,
    pub payload: Value,
    pub tenant: Tenant,

    pub status: QueueStatus,

    /// Number of completed (failed) processing attempts.
    pub attempts: u32,

    /// Attempt ceiling; reaching it makes a failed item dead-letter.
    pub max_attempts: u32,

    pub received_at: DateTime<Utc>,

    /// The item is not eligible for leasing before this time.
    pub process_after: DateTime<Utc>,

    /// Lease expiry; `None` when unlocked.
    pub locked_until: Option<DateTime<Utc>>,

    /// When the current/most recent lease was taken.
    pub processing_started: Option<DateTime<Utc>>,

    /// Error text from the most recent failed attempt.
    pub last_error: Option<String>,

    /// Absolute expiry for garbage collection.
    pub expires_at: DateTime<Utc>,
}

impl QueueItem {
    /// Whether this item can be leased at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        let retryable = match self.status {
            QueueStatus::Pending => true,
            QueueStatus::Failed => self.attempts < self.max_attempts,
            QueueStatus::Processing | QueueStatus::Completed => false,
        };
        retryable
            && self.process_after <= now
            && self.locked_until.map_or(true, |until| until <= now)
    }

    /// Whether this item has exhausted its retry budget.
    pub fn is_dead_letter(&self) -> bool {
        self.status == QueueStatus::Failed && self.attempts >= self.max_attempts
    }
}
