//! Scheduler-driven batch processing of the durable queues.

mod batch;
mod config;

pub use batch::{BatchProcessor, RunReport, WorkerError};
pub use config::{ConfigError, WorkerConfig};
