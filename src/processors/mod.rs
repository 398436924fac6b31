//! Type processors: the business logic turning one external event into
//! idempotent domain writes.
//!
//! Each queue family has a closed event enum parsed from the raw event-type
//! string, with exhaustive matching over the variants. An event type that
//! routes to a family but does not parse into its enum is a taxonomy gap, a
//! hard error kept distinct in logs from transient faults.
//!
//! Handler contract, uniformly applied:
//!
//! - idempotent upsert keyed on (external id, tenant location), with
//!   create-on-missing so that an Update arriving before its Create works;
//! - missing tenant location is a hard error; missing optional enrichment
//!   fields default to empty;
//! - multi-collection writes for one event go through the store's atomic
//!   composite operations.

mod appointments;
mod contacts;
mod lifecycle;
mod messages;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::outbound::SetupTrigger;
use crate::router::{classify, QueueName};
use crate::store::{DomainStore, StoreError};
use crate::types::{MissingTenant, WebhookEnvelope};

/// Errors from processing one event.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    MissingTenant(#[from] MissingTenant),

    /// The event type routed to a family whose closed enum does not know it.
    #[error("unrecognized {family} event sub-type: {event_type}")]
    TaxonomyGap {
        family: &'static str,
        event_type: String,
    },

    /// A required correlation field was absent from the payload.
    #[error("payload missing required field `{0}`")]
    MissingField(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Taxonomy gaps are schema drift, not transient faults; callers log
    /// them differently.
    pub fn is_taxonomy_gap(&self) -> bool {
        matches!(self, ProcessError::TaxonomyGap { .. })
    }
}

/// Result type for processor operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Routes an envelope to its family processor.
///
/// Both the batch worker and the direct fast path go through here, so the
/// two paths perform byte-identical domain writes and double-execution
/// collapses to a no-op at the store.
pub struct Dispatcher {
    domain: Arc<dyn DomainStore>,
    trigger: Arc<dyn SetupTrigger>,
}

impl Dispatcher {
    pub fn new(domain: Arc<dyn DomainStore>, trigger: Arc<dyn SetupTrigger>) -> Self {
        Dispatcher { domain, trigger }
    }

    #[instrument(
        skip(self, envelope),
        fields(webhook_id = %envelope.webhook_id, event_type = %envelope.event_type)
    )]
    pub async fn process(&self, envelope: &WebhookEnvelope) -> Result<()> {
        match classify(&envelope.event_type).queue {
            QueueName::Critical => {
                lifecycle::process(self.domain.as_ref(), self.trigger.as_ref(), envelope).await
            }
            QueueName::Messages => messages::process(self.domain.as_ref(), envelope).await,
            QueueName::Appointments => appointments::process(self.domain.as_ref(), envelope).await,
            QueueName::Contacts => contacts::process(self.domain.as_ref(), envelope).await,
            QueueName::General => {
                // General-queue events have no domain writes today. They are
                // acknowledged so the queue drains.
                debug!("no domain handler for general-queue event");
                Ok(())
            }
        }
    }
}

/// Parses an RFC 3339 timestamp field, ignoring absent or malformed values.
fn datetime_field(
    envelope: &WebhookEnvelope,
    key: &str,
) -> Option<chrono::DateTime<chrono::Utc>> {
    envelope
        .payload_str(key)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}
