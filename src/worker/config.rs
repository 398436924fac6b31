//! Worker tunables, validated once at startup.

use std::time::Duration;

use thiserror::Error;

/// Invalid worker configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("idle_sleep must be shorter than max_runtime")]
    IdleSleepTooLong,
}

/// One explicit configuration struct for the batch processor.
///
/// Built once, validated once; no merging of aliased knobs at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Wall-clock budget for one invocation.
    pub max_runtime: Duration,

    /// Items leased per batch.
    pub batch_size: usize,

    /// Concurrent items in flight within a batch.
    pub concurrency: usize,

    /// Sleep between polls when the queue is empty.
    pub idle_sleep: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            max_runtime: Duration::from_secs(50),
            batch_size: 50,
            concurrency: 5,
            idle_sleep: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = max_runtime;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Rejects configurations that would stall or busy-loop the worker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_runtime.is_zero() {
            return Err(ConfigError::Zero("max_runtime"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("concurrency"));
        }
        if self.idle_sleep >= self.max_runtime {
            return Err(ConfigError::IdleSleepTooLong);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(WorkerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_knobs_are_rejected() {
        let config = WorkerConfig::default().with_batch_size(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero("batch_size")));

        let config = WorkerConfig::default().with_concurrency(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero("concurrency")));

        let config = WorkerConfig::default().with_max_runtime(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::Zero("max_runtime")));
    }

    #[test]
    fn idle_sleep_must_fit_in_budget() {
        let config = WorkerConfig::default()
            .with_max_runtime(Duration::from_millis(500))
            .with_idle_sleep(Duration::from_secs(1));
        assert_eq!(config.validate(), Err(ConfigError::IdleSleepTooLong));
    }
}
