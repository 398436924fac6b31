//! The webhook ingestion handler.
//!
//! Acknowledgement policy: only a missing/invalid signature or an expired
//! timestamp is rejected (401). Every delivery that passes verification is
//! acknowledged 200, including duplicates and internal failures, so the
//! sender never retry-storms us for our own problems.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::queue::NewQueueItem;
use crate::router::classify;
use crate::store::EnqueueOutcome;
use crate::types::WebhookEnvelope;

use super::AppState;

/// Header carrying the base64 payload signature.
pub const SIGNATURE_HEADER: &str = "x-wh-signature";

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let received_at = Utc::now();

    // Verification runs over the exact raw bytes, before any parsing.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let Some(signature) = signature else {
        return (StatusCode::UNAUTHORIZED, "Missing signature").into_response();
    };
    if !state.verifier.verify(&body, signature) {
        return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(error) => {
            // Authenticated but unparseable; acknowledge so the sender does
            // not retry a body that will never parse.
            warn!(%error, "acknowledging unparseable webhook body");
            return ack("unparseable");
        }
    };
    let envelope = WebhookEnvelope::from_request(payload, received_at);

    if let Some(claimed) = envelope.timestamp {
        if let Err(expired) = state.verifier.check_timestamp(claimed, received_at) {
            return (StatusCode::UNAUTHORIZED, expired.to_string()).into_response();
        }
    }

    if let Err(error) = state
        .metrics
        .record_received(&envelope.webhook_id, &envelope.event_type)
        .await
    {
        warn!(webhook_id = %envelope.webhook_id, %error, "failed to record receipt");
    }

    if state.dedup.is_duplicate(&envelope).await {
        return ack_for(&envelope, "duplicate");
    }

    let route = classify(&envelope.event_type);
    if !route.recognized {
        if let Err(error) = state
            .discovery
            .record_unknown(&envelope.event_type, &envelope.payload)
            .await
        {
            warn!(event_type = %envelope.event_type, %error, "failed to record unknown event type");
        }
    }

    // Direct path races the queue; its handle is dropped on purpose, the
    // response never waits for it.
    let _ = state.direct.maybe_spawn(route, &envelope).await;

    let outcome = state
        .queue_store
        .enqueue(NewQueueItem {
            webhook_id: envelope.webhook_id.clone(),
            event_type: envelope.event_type.clone(),
            queue: route.queue,
            priority: route.priority,
            payload: envelope.payload.clone(),
            tenant: envelope.tenant.clone(),
            received_at: envelope.received_at,
        })
        .await;

    match outcome {
        Ok(EnqueueOutcome::Inserted(_)) => {
            info!(
                webhook_id = %envelope.webhook_id,
                event_type = %envelope.event_type,
                queue = %route.queue,
                priority = %route.priority,
                "webhook queued"
            );
            ack_for(&envelope, "queued")
        }
        Ok(EnqueueOutcome::Duplicate) => {
            debug!(webhook_id = %envelope.webhook_id, "webhook already queued");
            ack_for(&envelope, "duplicate")
        }
        Err(error) => {
            // Internal failure still acknowledges; the sender's redelivery
            // is our recovery path here.
            warn!(webhook_id = %envelope.webhook_id, %error, "enqueue failed, acknowledging anyway");
            ack_for(&envelope, "accepted")
        }
    }
}

fn ack(status: &str) -> Response {
    (StatusCode::OK, Json(json!({ "status": status }))).into_response()
}

fn ack_for(envelope: &WebhookEnvelope, status: &str) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "status": status, "webhookId": envelope.webhook_id })),
    )
        .into_response()
}
