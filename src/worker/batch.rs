//! The generic batch processor: lease, fan out, resolve.
//!
//! One invocation is a short bounded task, re-run by an external scheduler.
//! The loop leases a batch from one queue, processes it with bounded
//! concurrency and per-item isolation, and resolves every item to completed
//! or failed-with-backoff. Work that is still pending (or failed with an
//! elapsed `process_after`) is picked up by the next invocation; nothing in
//! this process outlives the wall-clock budget except items already in
//! flight, which are allowed to finish.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::processors::Dispatcher;
use crate::queue::QueueItem;
use crate::router::QueueName;
use crate::store::{MetricsStore, ProcessingPath, QueueStore, StoreError};
use crate::types::WebhookEnvelope;

use super::WorkerConfig;

/// Errors fatal to one worker invocation.
///
/// Per-item failures never surface here; they are resolved via
/// `mark_failed`. Only outer-loop store failures abort the invocation, and
/// the next scheduled run self-heals.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one invocation accomplished, reported back to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub queue: QueueName,
    pub processed: usize,
    pub failed: usize,
    pub batches: usize,
    pub runtime_ms: u64,
}

/// Drains one queue within a wall-clock budget.
pub struct BatchProcessor {
    queue_store: Arc<dyn QueueStore>,
    metrics: Arc<dyn MetricsStore>,
    dispatcher: Arc<Dispatcher>,
    config: WorkerConfig,
}

impl BatchProcessor {
    pub fn new(
        queue_store: Arc<dyn QueueStore>,
        metrics: Arc<dyn MetricsStore>,
        dispatcher: Arc<Dispatcher>,
        config: WorkerConfig,
    ) -> Self {
        BatchProcessor {
            queue_store,
            metrics,
            dispatcher,
            config,
        }
    }

    /// Runs one bounded invocation against `queue`.
    ///
    /// The budget is checked between batches only; items already dispatched
    /// finish even if the budget elapses mid-batch.
    #[instrument(skip(self), fields(queue = %queue))]
    pub async fn run(&self, queue: QueueName) -> Result<RunReport, WorkerError> {
        let started = Instant::now();

        let purged = self.queue_store.purge_expired().await?;
        if purged > 0 {
            debug!(purged, "expired queue items purged");
        }

        let mut processed = 0usize;
        let mut failed = 0usize;
        let mut batches = 0usize;

        while started.elapsed() < self.config.max_runtime {
            let batch = self
                .queue_store
                .lease_batch(queue, self.config.batch_size)
                .await?;

            if batch.is_empty() {
                if started.elapsed() + self.config.idle_sleep >= self.config.max_runtime {
                    break;
                }
                tokio::time::sleep(self.config.idle_sleep).await;
                continue;
            }

            batches += 1;
            let outcomes: Vec<bool> = stream::iter(batch)
                .map(|item| self.process_item(item))
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;
            processed += outcomes.iter().filter(|ok| **ok).count();
            failed += outcomes.iter().filter(|ok| !**ok).count();
        }

        let report = RunReport {
            queue,
            processed,
            failed,
            batches,
            runtime_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            processed = report.processed,
            failed = report.failed,
            batches = report.batches,
            runtime_ms = report.runtime_ms,
            "worker invocation finished"
        );
        Ok(report)
    }

    /// Processes one leased item. Never propagates: every outcome resolves
    /// the item, so one item's failure cannot abort its siblings.
    async fn process_item(&self, item: QueueItem) -> bool {
        let envelope = WebhookEnvelope {
            webhook_id: item.webhook_id.clone(),
            event_type: item.event_type.clone(),
            received_at: item.received_at,
            payload: item.payload.clone(),
            tenant: item.tenant.clone(),
            timestamp: None,
        };

        if let Err(error) = self
            .metrics
            .record_started(&item.webhook_id, ProcessingPath::Queued)
            .await
        {
            warn!(webhook_id = %item.webhook_id, %error, "failed to record processing start");
        }

        match self.dispatcher.process(&envelope).await {
            Ok(()) => {
                if let Err(error) = self.queue_store.mark_completed(&item.id).await {
                    warn!(webhook_id = %item.webhook_id, %error, "failed to mark item completed");
                    return false;
                }
                if let Err(error) = self
                    .metrics
                    .record_finished(&item.webhook_id, true, None)
                    .await
                {
                    warn!(webhook_id = %item.webhook_id, %error, "failed to record completion");
                }
                true
            }
            Err(process_error) => {
                let message = process_error.to_string();
                if process_error.is_taxonomy_gap() {
                    warn!(
                        webhook_id = %item.webhook_id,
                        event_type = %item.event_type,
                        "taxonomy gap: event type routed to a family that does not know it"
                    );
                } else {
                    warn!(
                        webhook_id = %item.webhook_id,
                        event_type = %item.event_type,
                        error = %message,
                        attempt = item.attempts + 1,
                        "item processing failed"
                    );
                }

                if let Err(error) = self.queue_store.mark_failed(&item.id, &message).await {
                    warn!(webhook_id = %item.webhook_id, %error, "failed to mark item failed");
                }
                if item.attempts + 1 >= item.max_attempts {
                    error!(
                        webhook_id = %item.webhook_id,
                        event_type = %item.event_type,
                        attempts = item.attempts + 1,
                        "item exhausted its retry budget, dead-letter"
                    );
                }
                if let Err(error) = self
                    .metrics
                    .record_finished(&item.webhook_id, false, Some(&message))
                    .await
                {
                    warn!(webhook_id = %item.webhook_id, %error, "failed to record failure");
                }
                false
            }
        }
    }
}
