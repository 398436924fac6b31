//! Contact events: create/update/delete plus DND and tag partial updates.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::store::{ContactRecord, DomainStore};
use crate::types::WebhookEnvelope;

use super::{ProcessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContactEvent {
    Create,
    Update,
    Delete,
    DndUpdate,
    TagUpdate,
}

impl ContactEvent {
    fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "ContactCreate" => Some(ContactEvent::Create),
            "ContactUpdate" => Some(ContactEvent::Update),
            "ContactDelete" => Some(ContactEvent::Delete),
            "ContactDndUpdate" => Some(ContactEvent::DndUpdate),
            "ContactTagUpdate" => Some(ContactEvent::TagUpdate),
            _ => None,
        }
    }
}

pub(crate) async fn process(domain: &dyn DomainStore, envelope: &WebhookEnvelope) -> Result<()> {
    let event = ContactEvent::parse(&envelope.event_type).ok_or(ProcessError::TaxonomyGap {
        family: "contact",
        event_type: envelope.event_type.clone(),
    })?;
    let location = envelope.tenant.require_location()?;
    let contact_id = envelope
        .payload_str("id")
        .or_else(|| envelope.payload_str("contactId"))
        .ok_or(ProcessError::MissingField("id"))?;

    match event {
        // Create and Update are the same write: idempotent upsert.
        ContactEvent::Create | ContactEvent::Update => {
            let contact = ContactRecord {
                id: contact_id.to_string(),
                email: envelope.payload_str("email").unwrap_or_default().to_string(),
                name: display_name(envelope),
                phone: envelope.payload_str("phone").unwrap_or_default().to_string(),
                dnd: false,
                tags: Vec::new(),
                updated_at: Utc::now(),
            };
            domain.upsert_contact(location, contact).await?;
        }
        ContactEvent::Delete => {
            domain.delete_contact(location, contact_id).await?;
            debug!(%contact_id, "contact deleted");
        }
        ContactEvent::DndUpdate => {
            let dnd = envelope
                .payload
                .get("dnd")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            domain.set_contact_dnd(location, contact_id, dnd).await?;
        }
        ContactEvent::TagUpdate => {
            let tags = envelope
                .payload
                .get("tags")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            domain.set_contact_tags(location, contact_id, tags).await?;
        }
    }
    Ok(())
}

/// Prefers an explicit `name`, else joins first/last, else empty.
fn display_name(envelope: &WebhookEnvelope) -> String {
    if let Some(name) = envelope.payload_str("name") {
        return name.to_string();
    }
    let first = envelope.payload_str("firstName").unwrap_or_default();
    let last = envelope.payload_str("lastName").unwrap_or_default();
    let joined = format!("{first} {last}");
    joined.trim().to_string()
}
