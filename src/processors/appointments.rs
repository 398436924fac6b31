//! Appointment and financial events.
//!
//! Invoice and order events share the appointments queue (same priority
//! band) and are kept as flat idempotent financial records.

use chrono::Utc;
use serde_json::Value;

use crate::store::{AppointmentRecord, DomainStore, FinancialKind, FinancialRecord};
use crate::types::WebhookEnvelope;

use super::{datetime_field, ProcessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppointmentEvent {
    Create,
    Update,
    Delete,
    InvoicePaid,
    InvoiceVoid,
    OrderCreate,
}

impl AppointmentEvent {
    fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "AppointmentCreate" => Some(AppointmentEvent::Create),
            "AppointmentUpdate" => Some(AppointmentEvent::Update),
            "AppointmentDelete" => Some(AppointmentEvent::Delete),
            "InvoicePaid" => Some(AppointmentEvent::InvoicePaid),
            "InvoiceVoid" => Some(AppointmentEvent::InvoiceVoid),
            "OrderCreate" => Some(AppointmentEvent::OrderCreate),
            _ => None,
        }
    }
}

pub(crate) async fn process(domain: &dyn DomainStore, envelope: &WebhookEnvelope) -> Result<()> {
    let event = AppointmentEvent::parse(&envelope.event_type).ok_or(ProcessError::TaxonomyGap {
        family: "appointment",
        event_type: envelope.event_type.clone(),
    })?;
    let location = envelope.tenant.require_location()?;

    match event {
        AppointmentEvent::Create | AppointmentEvent::Update => {
            let id = envelope
                .payload_str("appointmentId")
                .or_else(|| envelope.payload_str("id"))
                .ok_or(ProcessError::MissingField("appointmentId"))?;
            let appointment = AppointmentRecord {
                id: id.to_string(),
                calendar_id: envelope
                    .payload_str("calendarId")
                    .unwrap_or_default()
                    .to_string(),
                contact_id: envelope
                    .payload_str("contactId")
                    .unwrap_or_default()
                    .to_string(),
                title: envelope.payload_str("title").unwrap_or_default().to_string(),
                status: envelope
                    .payload_str("appointmentStatus")
                    .or_else(|| envelope.payload_str("status"))
                    .unwrap_or_default()
                    .to_string(),
                start_time: datetime_field(envelope, "startTime"),
                end_time: datetime_field(envelope, "endTime"),
                updated_at: Utc::now(),
            };
            domain.upsert_appointment(location, appointment).await?;
        }
        AppointmentEvent::Delete => {
            let id = envelope
                .payload_str("appointmentId")
                .or_else(|| envelope.payload_str("id"))
                .ok_or(ProcessError::MissingField("appointmentId"))?;
            domain.delete_appointment(location, id).await?;
        }
        AppointmentEvent::InvoicePaid | AppointmentEvent::InvoiceVoid => {
            let id = envelope
                .payload_str("invoiceId")
                .or_else(|| envelope.payload_str("id"))
                .ok_or(ProcessError::MissingField("invoiceId"))?;
            let status = match event {
                AppointmentEvent::InvoicePaid => "paid",
                _ => "void",
            };
            domain
                .upsert_financial(location, financial(envelope, id, FinancialKind::Invoice, status))
                .await?;
        }
        AppointmentEvent::OrderCreate => {
            let id = envelope
                .payload_str("orderId")
                .or_else(|| envelope.payload_str("id"))
                .ok_or(ProcessError::MissingField("orderId"))?;
            let status = envelope.payload_str("status").unwrap_or("created");
            domain
                .upsert_financial(location, financial(envelope, id, FinancialKind::Order, status))
                .await?;
        }
    }
    Ok(())
}

fn financial(
    envelope: &WebhookEnvelope,
    id: &str,
    kind: FinancialKind,
    status: &str,
) -> FinancialRecord {
    FinancialRecord {
        id: id.to_string(),
        kind,
        status: status.to_string(),
        contact_id: envelope
            .payload_str("contactId")
            .unwrap_or_default()
            .to_string(),
        amount: envelope
            .payload
            .get("amount")
            .or_else(|| envelope.payload.get("total"))
            .and_then(Value::as_f64),
        updated_at: Utc::now(),
    }
}
