//! Webhook ingestion, queueing, and processing pipeline for an external CRM
//! platform.
//!
//! The pipeline, front to back:
//!
//! 1. [`verify`] authenticates each delivery (ed25519 over the raw bytes)
//!    and enforces the replay window; this is the only stage that rejects.
//! 2. [`types`] normalizes the payload into one canonical envelope.
//! 3. [`dedup`] drops recent re-deliveries, best-effort.
//! 4. [`router`] classifies the event into a queue, priority band, and
//!    direct-processing eligibility.
//! 5. [`store`] holds the durable queue (idempotent on webhook ID) and the
//!    domain collections behind collaborator traits.
//! 6. [`direct`] races a fire-and-forget fast path against the queue for
//!    latency-sensitive events.
//! 7. [`worker`] drains queues in short scheduler-driven invocations with
//!    leases, bounded fan-out, and exponential backoff.
//! 8. [`processors`] turn each event into idempotent domain writes.
//!
//! Every domain write is an idempotent upsert, so at-least-once delivery,
//! lease steals, and the direct/queued race all collapse to single-apply
//! semantics.

pub mod config;
pub mod dedup;
pub mod direct;
pub mod outbound;
pub mod processors;
pub mod queue;
pub mod router;
pub mod server;
pub mod store;
pub mod types;
pub mod verify;
pub mod worker;
