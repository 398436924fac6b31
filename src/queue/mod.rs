//! Durable queue item model and retry/lease policy.

mod item;
mod policy;

pub use item::{NewQueueItem, QueueItem, QueueItemId, QueueStatus};
pub use policy::{BackoffPolicy, LeasePolicy, QueuePolicy, ITEM_TTL};
