//! Persistence seams consumed by the pipeline.
//!
//! The pipeline treats storage as an external collaborator: a document store
//! with per-collection atomic upsert plus a multi-document transactional
//! scope. These traits are the exact interface the core needs; the bundled
//! [`MemoryStore`] implements all of them and is what the tests (and the
//! default binary) run against. A production deployment swaps in a document
//! database behind the same traits.
//!
//! # Atomicity Contract
//!
//! - `QueueStore::lease_batch` is atomic with respect to concurrent leasers:
//!   no two callers may receive the same item.
//! - `QueueStore::enqueue` is idempotent on webhook ID: concurrent enqueues
//!   of the same ID yield exactly one live item and a `Duplicate` outcome
//!   for the losers.
//! - `DomainStore::record_message` performs its conversation upsert, message
//!   insert, unread adjustment, and project-timeline stamp all-or-nothing.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::queue::{NewQueueItem, QueueItem, QueueItemId};
use crate::router::QueueName;
use crate::types::WebhookId;

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// The referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of an enqueue attempt.
///
/// `Duplicate` is a distinguishable non-error: the webhook was already
/// durably queued, so the caller acknowledges and creates no new work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new item was inserted.
    Inserted(QueueItemId),
    /// A live item with the same webhook ID already exists.
    Duplicate,
}

/// Durable, priority-ordered, leasable queue of webhook work items.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Inserts a pending item, idempotent on webhook ID.
    async fn enqueue(&self, item: NewQueueItem) -> Result<EnqueueOutcome>;

    /// Atomically selects up to `limit` eligible items from one queue,
    /// ordered by (priority ascending, received_at ascending), marks them
    /// processing, and stamps their lease.
    ///
    /// Expired leases are reclaimed first: a crashed worker's items become
    /// leasable again once their `locked_until` passes.
    async fn lease_batch(&self, queue: QueueName, limit: usize) -> Result<Vec<QueueItem>>;

    /// Marks a leased item completed and clears its lease.
    async fn mark_completed(&self, id: &QueueItemId) -> Result<()>;

    /// Records a failed attempt: increments `attempts`, stores the error,
    /// clears the lease, and schedules the retry via exponential backoff.
    async fn mark_failed(&self, id: &QueueItemId, error: &str) -> Result<()>;

    /// Number of live (not completed, not expired) items in a queue.
    async fn queue_depth(&self, queue: QueueName) -> Result<usize>;

    /// Removes items past their TTL. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Looks up the live item for a webhook ID, if any.
    async fn find_by_webhook_id(&self, webhook_id: &WebhookId) -> Result<Option<QueueItem>>;
}

/// Short-lived fingerprint records backing the best-effort dedup filter.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns true if `hash` was recorded within the duplicate window.
    /// Regardless of the outcome, (re)records the hash with a fresh expiry,
    /// extending the detection window forward.
    async fn check_and_record(&self, hash: &str) -> Result<bool>;
}

/// Which path started processing a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPath {
    /// The synchronous request-path fast lane.
    Direct,
    /// The durable queue + batch worker.
    Queued,
}

/// Per-webhook processing lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The path that started processing first.
    pub path: Option<ProcessingPath>,
    pub success: Option<bool>,
    pub error: Option<String>,
}

/// Metrics lifecycle store: one record per webhook ID, created by whichever
/// path starts first and updated by whichever finishes.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Records receipt of a webhook (creates the record).
    async fn record_received(&self, webhook_id: &WebhookId, event_type: &str) -> Result<()>;

    /// Records the start of processing. Creates the record if the received
    /// stamp is missing (the direct path can win the race).
    async fn record_started(&self, webhook_id: &WebhookId, path: ProcessingPath) -> Result<()>;

    /// Records the end of processing with its outcome.
    async fn record_finished(
        &self,
        webhook_id: &WebhookId,
        success: bool,
        error: Option<&str>,
    ) -> Result<()>;
}

/// Sink for event types the router does not recognize.
///
/// These are not errors: the event is still queued. The sink exists so that
/// operators notice schema drift in the upstream platform.
#[async_trait]
pub trait DiscoverySink: Send + Sync {
    async fn record_unknown(&self, event_type: &str, payload: &Value) -> Result<()>;
}

// ─── Domain records ───

/// Direction of a message relative to the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// A CRM contact, keyed by (location, external ID).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub dnd: bool,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation thread with a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub contact_id: String,
    pub unread_count: u32,
    pub last_message_body: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub contact_id: String,
    pub direction: MessageDirection,
    pub message_type: String,
    pub body: String,
    /// Delivery/open/click stats patched in by email-stats events.
    pub email_stats: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A calendar appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: String,
    pub calendar_id: String,
    pub contact_id: String,
    pub title: String,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Install state for one tenant location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location_id: String,
    pub company_id: Option<String>,
    pub plan: String,
    pub installed: bool,
    /// Set when the post-install setup trigger failed and an operator must
    /// finish provisioning by hand.
    pub needs_manual_setup: bool,
    pub installed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// What kind of financial event a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialKind {
    Invoice,
    Order,
}

/// An invoice or order event, kept as a flat idempotent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub id: String,
    pub kind: FinancialKind,
    pub status: String,
    pub contact_id: String,
    pub amount: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// A timeline entry stamped onto an active project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub note: String,
    pub at: DateTime<Utc>,
}

/// A customer project; inbound messages from its contact stamp the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub contact_id: String,
    pub active: bool,
    pub timeline: Vec<TimelineEntry>,
}

/// Conversation fields for the composite message write.
#[derive(Debug, Clone)]
pub struct ConversationUpsert {
    pub id: String,
    pub contact_id: String,
}

/// Outcome of [`DomainStore::record_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageWriteOutcome {
    /// False when the message already existed (idempotent replay).
    pub message_inserted: bool,
    /// True when the conversation was created by this write.
    pub conversation_created: bool,
}

/// Idempotent writes over the domain collections.
///
/// Every write is an upsert keyed by (external ID, tenant location):
/// update-then-create-if-missing, never a blind insert, so replaying the
/// same event is a no-op or an in-place update.
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn upsert_contact(&self, location_id: &str, contact: ContactRecord) -> Result<()>;
    async fn delete_contact(&self, location_id: &str, contact_id: &str) -> Result<()>;

    /// Sets the do-not-disturb flag, creating a minimal contact if the
    /// update arrived before its create.
    async fn set_contact_dnd(&self, location_id: &str, contact_id: &str, dnd: bool) -> Result<()>;

    /// Replaces the tag set, creating a minimal contact if missing.
    async fn set_contact_tags(
        &self,
        location_id: &str,
        contact_id: &str,
        tags: Vec<String>,
    ) -> Result<()>;

    /// Atomic composite write for one message event: upserts the
    /// conversation, inserts the message if absent, adjusts the unread
    /// count (inbound: +1, outbound: reset to 0, only when the message was
    /// newly inserted), and stamps the contact's active project timeline
    /// for newly inserted inbound messages. All-or-nothing.
    async fn record_message(
        &self,
        location_id: &str,
        conversation: ConversationUpsert,
        message: MessageRecord,
    ) -> Result<MessageWriteOutcome>;

    /// Overwrites a conversation's unread count, creating a minimal
    /// conversation if missing.
    async fn set_unread(&self, location_id: &str, conversation_id: &str, count: u32) -> Result<()>;

    /// Merges email delivery stats onto a message, creating a stub message
    /// if the stats arrived before the message itself.
    async fn apply_email_stats(
        &self,
        location_id: &str,
        message_id: &str,
        stats: Value,
    ) -> Result<()>;

    async fn upsert_appointment(
        &self,
        location_id: &str,
        appointment: AppointmentRecord,
    ) -> Result<()>;
    async fn delete_appointment(&self, location_id: &str, appointment_id: &str) -> Result<()>;

    async fn upsert_location(&self, location: LocationRecord) -> Result<()>;
    async fn mark_uninstalled(&self, location_id: &str) -> Result<()>;
    async fn update_plan(&self, location_id: &str, plan: &str) -> Result<()>;
    async fn set_needs_manual_setup(&self, location_id: &str, needs: bool) -> Result<()>;

    async fn upsert_financial(&self, location_id: &str, record: FinancialRecord) -> Result<()>;

    async fn upsert_project(&self, location_id: &str, project: ProjectRecord) -> Result<()>;

    // Read-side accessors, used by the fast path's narrow projections and
    // by tests asserting final domain state.
    async fn get_contact(&self, location_id: &str, contact_id: &str)
        -> Result<Option<ContactRecord>>;
    async fn get_conversation(
        &self,
        location_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>>;
    async fn get_message(&self, location_id: &str, message_id: &str)
        -> Result<Option<MessageRecord>>;
    async fn get_appointment(
        &self,
        location_id: &str,
        appointment_id: &str,
    ) -> Result<Option<AppointmentRecord>>;
    async fn get_location(&self, location_id: &str) -> Result<Option<LocationRecord>>;
    async fn get_financial(
        &self,
        location_id: &str,
        record_id: &str,
    ) -> Result<Option<FinancialRecord>>;
    async fn get_project(&self, location_id: &str, project_id: &str)
        -> Result<Option<ProjectRecord>>;
}
