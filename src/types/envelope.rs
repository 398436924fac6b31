//! The canonical inbound webhook envelope.
//!
//! The CRM delivers payloads in two shapes: a flat object carrying `type`,
//! `locationId`, etc. at the top level, and a wrapped form where the real
//! payload sits under a `webhookPayload` key. Normalization happens here, at
//! the ingestion boundary, so that no downstream component ever re-implements
//! shape sniffing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{Tenant, WebhookId};

/// One normalized inbound webhook, immutable after construction.
///
/// This is the request-scoped unit handed to the verifier, dedup filter,
/// router, and (via the queue) the type processors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Unique delivery ID (caller-supplied `webhookId` or generated).
    pub webhook_id: WebhookId,

    /// The raw event type string (e.g., "ContactCreate", "InboundMessage").
    pub event_type: String,

    /// When this process received the webhook.
    pub received_at: DateTime<Utc>,

    /// The normalized payload object.
    pub payload: Value,

    /// Tenant identifiers extracted from the payload.
    pub tenant: Tenant,

    /// Sender-claimed send time, if the payload carried one.
    ///
    /// Used only for the replay-window check; absent timestamps skip that
    /// check entirely.
    pub timestamp: Option<DateTime<Utc>>,
}

impl WebhookEnvelope {
    /// Builds a normalized envelope from a raw request body.
    ///
    /// Unwraps the nested `webhookPayload` shape if present, extracts the
    /// event type, tenant IDs, and claimed timestamp, and assigns a webhook
    /// ID (generating one when the sender did not supply it).
    pub fn from_request(body: Value, received_at: DateTime<Utc>) -> Self {
        // Unwrap `{ "webhookPayload": { ... } }` into the flat form. Fields
        // on the wrapper other than the payload are ignored.
        let payload = match body.get("webhookPayload") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => body,
        };

        let webhook_id = payload
            .get("webhookId")
            .and_then(Value::as_str)
            .map(WebhookId::new)
            .unwrap_or_else(WebhookId::generate);

        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tenant = Tenant {
            location_id: string_field(&payload, "locationId"),
            company_id: string_field(&payload, "companyId"),
        };

        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        WebhookEnvelope {
            webhook_id,
            event_type,
            received_at,
            payload,
            tenant,
            timestamp,
        }
    }

    /// Returns a string field from the payload, if present and non-empty.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
