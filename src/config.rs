//! Service configuration, built once from the environment and validated at
//! startup.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::dedup::DedupPolicy;
use crate::direct::DEFAULT_DEPTH_THRESHOLD;
use crate::queue::{BackoffPolicy, LeasePolicy, QueuePolicy};
use crate::verify::{KeyError, SignatureVerifier};
use crate::worker::WorkerConfig;

/// Errors from loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Worker(#[from] crate::worker::ConfigError),
}

/// Everything the binary needs, in one validated struct.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Base64-encoded ed25519 public key for signature verification.
    pub public_key: String,

    /// Provisioning endpoint fired on install; `None` disables the trigger.
    pub setup_trigger_url: Option<String>,

    /// Bearer credential for the setup trigger.
    pub setup_trigger_token: Option<String>,

    pub worker: WorkerConfig,
    pub queue_policy: QueuePolicy,
    pub dedup_policy: DedupPolicy,

    /// Queue-depth ceiling for the direct path's health check.
    pub direct_depth_threshold: usize,
}

impl ServiceConfig {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary lookup, which keeps the
    /// parsing testable without mutating process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = parse_or(&lookup, "CRM_RELAY_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let public_key = lookup("CRM_RELAY_PUBLIC_KEY")
            .ok_or(ConfigError::Missing("CRM_RELAY_PUBLIC_KEY"))?;

        let worker = WorkerConfig::default()
            .with_max_runtime(Duration::from_secs(parse_or(
                &lookup,
                "CRM_RELAY_MAX_RUNTIME_SECS",
                50u64,
            )?))
            .with_batch_size(parse_or(&lookup, "CRM_RELAY_BATCH_SIZE", 50usize)?)
            .with_concurrency(parse_or(&lookup, "CRM_RELAY_CONCURRENCY", 5usize)?)
            .with_idle_sleep(Duration::from_millis(parse_or(
                &lookup,
                "CRM_RELAY_IDLE_SLEEP_MS",
                1000u64,
            )?));

        let queue_policy = QueuePolicy {
            backoff: BackoffPolicy::default(),
            lease: LeasePolicy {
                duration: Duration::from_secs(parse_or(&lookup, "CRM_RELAY_LEASE_SECS", 300u64)?),
            },
            max_attempts: parse_or(&lookup, "CRM_RELAY_MAX_ATTEMPTS", 3u32)?,
            ..QueuePolicy::default()
        };

        let dedup_policy = DedupPolicy {
            window: Duration::from_secs(parse_or(&lookup, "CRM_RELAY_DEDUP_WINDOW_SECS", 60u64)?),
            ..DedupPolicy::default()
        };

        let config = ServiceConfig {
            bind_addr,
            public_key,
            setup_trigger_url: lookup("CRM_RELAY_SETUP_URL"),
            setup_trigger_token: lookup("CRM_RELAY_SETUP_TOKEN"),
            worker,
            queue_policy,
            dedup_policy,
            direct_depth_threshold: parse_or(
                &lookup,
                "CRM_RELAY_DIRECT_DEPTH_THRESHOLD",
                DEFAULT_DEPTH_THRESHOLD,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds the signature verifier from the configured key.
    pub fn verifier(&self) -> Result<SignatureVerifier, KeyError> {
        SignatureVerifier::from_base64(&self.public_key)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.worker.validate()?;
        // Fail at startup, not on the first webhook.
        self.verifier()?;
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
    use std::collections::HashMap;

    fn valid_key() -> String {
        use ed25519_dalek::SigningKey;
        use rand::rngs::OsRng;
        Base64.encode(SigningKey::generate(&mut OsRng).verifying_key().as_bytes())
    }

    fn lookup<'a>(vars: &'a HashMap<&'a str, String>) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let vars = HashMap::from([("CRM_RELAY_PUBLIC_KEY", valid_key())]);
        let config = ServiceConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.queue_policy.max_attempts, 3);
        assert_eq!(config.dedup_policy.window, Duration::from_secs(60));
        assert_eq!(config.direct_depth_threshold, DEFAULT_DEPTH_THRESHOLD);
        assert!(config.setup_trigger_url.is_none());
    }

    #[test]
    fn missing_public_key_is_an_error() {
        let vars = HashMap::new();
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Missing("CRM_RELAY_PUBLIC_KEY"))
        ));
    }

    #[test]
    fn garbage_public_key_fails_at_startup() {
        let vars = HashMap::from([("CRM_RELAY_PUBLIC_KEY", "@@@".to_string())]);
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Key(_))
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let vars = HashMap::from([
            ("CRM_RELAY_PUBLIC_KEY", valid_key()),
            ("CRM_RELAY_BATCH_SIZE", "10".to_string()),
            ("CRM_RELAY_LEASE_SECS", "60".to_string()),
            ("CRM_RELAY_SETUP_URL", "https://setup.test/hook".to_string()),
        ]);
        let config = ServiceConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.queue_policy.lease.duration, Duration::from_secs(60));
        assert_eq!(
            config.setup_trigger_url.as_deref(),
            Some("https://setup.test/hook")
        );
    }

    #[test]
    fn unparseable_override_is_an_error() {
        let vars = HashMap::from([
            ("CRM_RELAY_PUBLIC_KEY", valid_key()),
            ("CRM_RELAY_BATCH_SIZE", "lots".to_string()),
        ]);
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "CRM_RELAY_BATCH_SIZE", .. })
        ));
    }

    #[test]
    fn invalid_worker_tunables_are_rejected() {
        let vars = HashMap::from([
            ("CRM_RELAY_PUBLIC_KEY", valid_key()),
            ("CRM_RELAY_BATCH_SIZE", "0".to_string()),
        ]);
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Worker(_))
        ));
    }
}
