//! The scheduler trigger endpoint.
//!
//! An external periodic invoker posts here once per queue; one call is one
//! bounded worker invocation, and the run report goes back to the scheduler.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::router::QueueName;

use super::AppState;

pub async fn handle(State(state): State<AppState>, Path(queue): Path<String>) -> Response {
    let Some(queue) = QueueName::parse(&queue) else {
        return (StatusCode::NOT_FOUND, format!("unknown queue: {queue}")).into_response();
    };

    match state.worker.run(queue).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            // Fatal for this invocation only; the next scheduled run
            // self-heals.
            error!(%queue, error = %err, "worker invocation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "worker invocation failed").into_response()
        }
    }
}
