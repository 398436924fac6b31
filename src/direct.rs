//! The low-latency direct path that races the durable queue.
//!
//! For direct-eligible events (messages, under the current routing policy)
//! the ingestion handler dispatches processing immediately instead of
//! waiting for the next worker invocation. This is strictly in addition to
//! enqueueing: the queued path is the safety net, and because both paths run
//! the same idempotent writes, double execution collapses to a no-op.
//!
//! The task is fire-and-forget from the HTTP response's perspective. Any
//! failure is recorded in metrics and swallowed.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::processors::Dispatcher;
use crate::router::Route;
use crate::store::{MetricsStore, ProcessingPath, QueueStore};
use crate::types::WebhookEnvelope;

/// Default queue-depth ceiling for the health check.
pub const DEFAULT_DEPTH_THRESHOLD: usize = 100;

pub struct DirectProcessor {
    dispatcher: Arc<Dispatcher>,
    queue_store: Arc<dyn QueueStore>,
    metrics: Arc<dyn MetricsStore>,
    depth_threshold: usize,
}

impl DirectProcessor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue_store: Arc<dyn QueueStore>,
        metrics: Arc<dyn MetricsStore>,
        depth_threshold: usize,
    ) -> Self {
        DirectProcessor {
            dispatcher,
            queue_store,
            metrics,
            depth_threshold,
        }
    }

    /// Spawns direct processing when the route is eligible and the system
    /// is healthy (queue depth under the threshold).
    ///
    /// Returns the task handle so tests can await completion; the request
    /// path drops it and never awaits the outcome.
    pub async fn maybe_spawn(
        &self,
        route: Route,
        envelope: &WebhookEnvelope,
    ) -> Option<JoinHandle<()>> {
        if !route.direct_eligible {
            return None;
        }

        let healthy = match self.queue_store.queue_depth(route.queue).await {
            Ok(depth) => depth < self.depth_threshold,
            Err(error) => {
                warn!(%error, "queue depth check failed, skipping direct path");
                false
            }
        };
        if !healthy {
            debug!(
                webhook_id = %envelope.webhook_id,
                queue = %route.queue,
                "queue depth over threshold, leaving event to the worker"
            );
            return None;
        }

        let dispatcher = self.dispatcher.clone();
        let metrics = self.metrics.clone();
        let envelope = envelope.clone();
        Some(tokio::spawn(async move {
            if let Err(error) = metrics
                .record_started(&envelope.webhook_id, ProcessingPath::Direct)
                .await
            {
                warn!(webhook_id = %envelope.webhook_id, %error, "failed to record direct start");
            }
            match dispatcher.process(&envelope).await {
                Ok(()) => {
                    if let Err(error) = metrics
                        .record_finished(&envelope.webhook_id, true, None)
                        .await
                    {
                        warn!(webhook_id = %envelope.webhook_id, %error, "failed to record direct completion");
                    }
                }
                Err(process_error) => {
                    // The queued path will retry; this outcome is only
                    // recorded, never surfaced.
                    let message = process_error.to_string();
                    warn!(
                        webhook_id = %envelope.webhook_id,
                        event_type = %envelope.event_type,
                        error = %message,
                        "direct processing failed, queued path is the safety net"
                    );
                    if let Err(error) = metrics
                        .record_finished(&envelope.webhook_id, false, Some(&message))
                        .await
                    {
                        warn!(webhook_id = %envelope.webhook_id, %error, "failed to record direct failure");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::NullSetupTrigger;
    use crate::router::classify;
    use crate::store::{DomainStore, MemoryStore};
    use crate::types::WebhookId;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn direct(store: Arc<MemoryStore>, threshold: usize) -> DirectProcessor {
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(NullSetupTrigger)));
        DirectProcessor::new(dispatcher, store.clone(), store, threshold)
    }

    fn envelope(body: Value) -> WebhookEnvelope {
        WebhookEnvelope::from_request(body, Utc::now())
    }

    #[tokio::test]
    async fn eligible_event_is_processed_directly() {
        let store = Arc::new(MemoryStore::new());
        let processor = direct(store.clone(), DEFAULT_DEPTH_THRESHOLD);
        let env = envelope(json!({
            "type": "InboundMessage",
            "webhookId": "wh-1",
            "locationId": "loc-1",
            "conversationId": "cv-1",
            "contactId": "ct-1",
            "messageId": "msg-1",
            "body": "hi"
        }));

        let handle = processor
            .maybe_spawn(classify(&env.event_type), &env)
            .await
            .expect("message events are direct-eligible");
        handle.await.unwrap();

        let conversation = store.get_conversation("loc-1", "cv-1").await.unwrap().unwrap();
        assert_eq!(conversation.unread_count, 1);
        let metrics = store.metrics_for(&WebhookId::new("wh-1")).await.unwrap();
        assert_eq!(metrics.path, Some(ProcessingPath::Direct));
        assert_eq!(metrics.success, Some(true));
    }

    #[tokio::test]
    async fn ineligible_event_is_not_spawned() {
        let store = Arc::new(MemoryStore::new());
        let processor = direct(store, DEFAULT_DEPTH_THRESHOLD);
        let env = envelope(json!({
            "type": "ContactCreate",
            "locationId": "loc-1",
            "id": "ct-1"
        }));
        assert!(processor
            .maybe_spawn(classify(&env.event_type), &env)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn unhealthy_queue_skips_the_direct_path() {
        let store = Arc::new(MemoryStore::new());
        // Threshold of zero means the health check can never pass.
        let processor = direct(store, 0);
        let env = envelope(json!({
            "type": "InboundMessage",
            "locationId": "loc-1",
            "conversationId": "cv-1",
            "messageId": "msg-1"
        }));
        assert!(processor
            .maybe_spawn(classify(&env.event_type), &env)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn failure_is_recorded_and_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let processor = direct(store.clone(), DEFAULT_DEPTH_THRESHOLD);
        // Missing conversationId makes the processor fail.
        let env = envelope(json!({
            "type": "InboundMessage",
            "webhookId": "wh-1",
            "locationId": "loc-1",
            "messageId": "msg-1"
        }));

        let handle = processor
            .maybe_spawn(classify(&env.event_type), &env)
            .await
            .unwrap();
        handle.await.unwrap();

        let metrics = store.metrics_for(&WebhookId::new("wh-1")).await.unwrap();
        assert_eq!(metrics.success, Some(false));
        assert!(metrics.error.is_some());
    }
}
