//! Liveness endpoint with per-queue depths.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::router::QueueName;

use super::AppState;

pub async fn handle(State(state): State<AppState>) -> Response {
    let mut queues = Map::new();
    for queue in QueueName::ALL {
        match state.queue_store.queue_depth(queue).await {
            Ok(depth) => {
                queues.insert(queue.as_str().to_string(), json!(depth));
            }
            Err(error) => {
                warn!(%queue, %error, "queue depth unavailable");
                queues.insert(queue.as_str().to_string(), Value::Null);
            }
        }
    }
    Json(json!({ "status": "ok", "queues": queues })).into_response()
}
