//! Best-effort duplicate suppression for the ingestion path.
//!
//! The upstream platform redelivers webhooks, sometimes within seconds. This
//! filter fingerprints each payload and drops re-deliveries seen inside a
//! short window. It is explicitly best-effort: the durable queue's
//! webhook-ID uniqueness is the real idempotence guarantee, and a dedup
//! store failure must never cost us a webhook, so errors here degrade to
//! "not a duplicate".
//!
//! The fingerprint hashes the identifying fields in a fixed order, then the
//! remaining top-level fields in sorted order, so that two deliveries of the
//! same event hash identically even if the platform reorders JSON keys.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::store::DedupStore;
use crate::types::WebhookEnvelope;

/// Windows for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    /// A re-delivery inside this window counts as a duplicate.
    pub window: Duration,

    /// How long fingerprint records are retained. Longer than `window` so
    /// that a steady drip of re-deliveries keeps refreshing the record.
    pub expiry: Duration,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        DedupPolicy {
            window: Duration::from_secs(60),
            expiry: Duration::from_secs(300),
        }
    }
}

/// Fields hashed first, in this order, when present.
const IDENTITY_FIELDS: &[&str] = &[
    "webhookId",
    "type",
    "locationId",
    "companyId",
    "id",
    "contactId",
    "conversationId",
    "messageId",
    "appointmentId",
    "timestamp",
];

/// Computes the dedup fingerprint of a raw payload: lowercase hex SHA-256.
pub fn fingerprint(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    match payload.as_object() {
        Some(obj) => {
            for field in IDENTITY_FIELDS {
                if let Some(value) = obj.get(*field) {
                    hasher.update(field.as_bytes());
                    hasher.update(b"=");
                    hasher.update(value.to_string().as_bytes());
                    hasher.update(b";");
                }
            }
            let mut rest: Vec<(&str, &Value)> = obj
                .iter()
                .filter(|(k, _)| !IDENTITY_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.as_str(), v))
                .collect();
            rest.sort_by_key(|(k, _)| *k);
            for (k, v) in rest {
                hasher.update(k.as_bytes());
                hasher.update(b"=");
                hasher.update(v.to_string().as_bytes());
                hasher.update(b";");
            }
        }
        None => hasher.update(payload.to_string().as_bytes()),
    }
    hex::encode(hasher.finalize())
}

/// The request-path filter over a [`DedupStore`].
#[derive(Clone)]
pub struct DedupFilter {
    store: Arc<dyn DedupStore>,
}

impl DedupFilter {
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        DedupFilter { store }
    }

    /// Whether this envelope is a recent re-delivery. Store failures are
    /// logged and treated as first delivery.
    pub async fn is_duplicate(&self, envelope: &WebhookEnvelope) -> bool {
        let hash = fingerprint(&envelope.payload);
        match self.store.check_and_record(&hash).await {
            Ok(duplicate) => {
                if duplicate {
                    debug!(
                        webhook_id = %envelope.webhook_id,
                        event_type = %envelope.event_type,
                        %hash,
                        "duplicate delivery suppressed"
                    );
                }
                duplicate
            }
            Err(error) => {
                warn!(%error, webhook_id = %envelope.webhook_id, "dedup check failed, treating as first delivery");
                false
            }
        }
    }
}
