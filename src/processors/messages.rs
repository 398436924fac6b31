//! Message events: inbound/outbound messages, unread-count updates, and
//! email delivery stats.
//!
//! Inbound and outbound messages are the composite write: conversation
//! upsert, message insert, unread adjustment, and project-timeline stamp go
//! through the store's atomic `record_message`, so the direct and queued
//! paths can both run it and the second execution is a no-op.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::store::{ConversationUpsert, DomainStore, MessageDirection, MessageRecord};
use crate::types::WebhookEnvelope;

use super::{ProcessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageEvent {
    Inbound,
    Outbound,
    UnreadUpdate,
    EmailStats,
}

impl MessageEvent {
    fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "InboundMessage" => Some(MessageEvent::Inbound),
            "OutboundMessage" => Some(MessageEvent::Outbound),
            "ConversationUnreadUpdate" => Some(MessageEvent::UnreadUpdate),
            "LCEmailStats" => Some(MessageEvent::EmailStats),
            _ => None,
        }
    }
}

pub(crate) async fn process(domain: &dyn DomainStore, envelope: &WebhookEnvelope) -> Result<()> {
    let event = MessageEvent::parse(&envelope.event_type).ok_or(ProcessError::TaxonomyGap {
        family: "message",
        event_type: envelope.event_type.clone(),
    })?;
    let location = envelope.tenant.require_location()?;

    match event {
        MessageEvent::Inbound => record(domain, location, envelope, MessageDirection::Inbound).await,
        MessageEvent::Outbound => {
            record(domain, location, envelope, MessageDirection::Outbound).await
        }
        MessageEvent::UnreadUpdate => {
            let conversation_id = envelope
                .payload_str("conversationId")
                .ok_or(ProcessError::MissingField("conversationId"))?;
            let count = envelope
                .payload
                .get("unreadCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            domain.set_unread(location, conversation_id, count).await?;
            Ok(())
        }
        MessageEvent::EmailStats => {
            let message_id = envelope
                .payload_str("messageId")
                .or_else(|| envelope.payload_str("id"))
                .ok_or(ProcessError::MissingField("messageId"))?;
            let stats = envelope
                .payload
                .get("stats")
                .cloned()
                .unwrap_or_else(|| envelope.payload.clone());
            domain.apply_email_stats(location, message_id, stats).await?;
            Ok(())
        }
    }
}

async fn record(
    domain: &dyn DomainStore,
    location: &str,
    envelope: &WebhookEnvelope,
    direction: MessageDirection,
) -> Result<()> {
    let conversation_id = envelope
        .payload_str("conversationId")
        .ok_or(ProcessError::MissingField("conversationId"))?;
    let message_id = envelope
        .payload_str("messageId")
        .or_else(|| envelope.payload_str("id"))
        .ok_or(ProcessError::MissingField("messageId"))?;
    let contact_id = envelope.payload_str("contactId").unwrap_or_default();

    let outcome = domain
        .record_message(
            location,
            ConversationUpsert {
                id: conversation_id.to_string(),
                contact_id: contact_id.to_string(),
            },
            MessageRecord {
                id: message_id.to_string(),
                conversation_id: conversation_id.to_string(),
                contact_id: contact_id.to_string(),
                direction,
                message_type: envelope
                    .payload_str("messageType")
                    .unwrap_or("SMS")
                    .to_string(),
                body: envelope.payload_str("body").unwrap_or_default().to_string(),
                email_stats: None,
                created_at: envelope.timestamp.unwrap_or_else(Utc::now),
            },
        )
        .await?;

    if !outcome.message_inserted {
        debug!(%message_id, "message already recorded, write was a no-op");
    }
    Ok(())
}
