//! HTTP surface: webhook ingestion, the scheduler trigger, and health.

mod health;
mod process;
mod webhook;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::dedup::DedupFilter;
use crate::direct::DirectProcessor;
use crate::store::{DiscoverySink, MetricsStore, QueueStore};
use crate::verify::SignatureVerifier;
use crate::worker::BatchProcessor;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SignatureVerifier>,
    pub queue_store: Arc<dyn QueueStore>,
    pub dedup: DedupFilter,
    pub metrics: Arc<dyn MetricsStore>,
    pub discovery: Arc<dyn DiscoverySink>,
    pub direct: Arc<DirectProcessor>,
    pub worker: Arc<BatchProcessor>,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook::handle))
        .route("/process/{queue}", post(process::handle))
        .route("/health", get(health::handle))
        .with_state(state)
}
