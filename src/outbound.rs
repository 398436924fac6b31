//! Outbound side effects: the post-install setup trigger.
//!
//! New installs kick off an external provisioning routine over authenticated
//! HTTP. The trigger is best-effort from the install's point of view: its
//! failure flags the location for manual setup instead of failing the
//! lifecycle event.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Errors from firing the setup trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("setup trigger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("setup trigger returned status {0}")]
    Status(reqwest::StatusCode),
}

/// The external provisioning hook fired on install.
#[async_trait]
pub trait SetupTrigger: Send + Sync {
    async fn fire(&self, location_id: &str) -> Result<(), TriggerError>;
}

/// HTTP implementation posting to a provisioning endpoint with an optional
/// bearer credential.
pub struct HttpSetupTrigger {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpSetupTrigger {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        HttpSetupTrigger {
            client: reqwest::Client::new(),
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl SetupTrigger for HttpSetupTrigger {
    async fn fire(&self, location_id: &str) -> Result<(), TriggerError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "locationId": location_id }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TriggerError::Status(response.status()));
        }
        info!(%location_id, "setup trigger fired");
        Ok(())
    }
}

/// Trigger for deployments without a provisioning endpoint configured.
pub struct NullSetupTrigger;

#[async_trait]
impl SetupTrigger for NullSetupTrigger {
    async fn fire(&self, _location_id: &str) -> Result<(), TriggerError> {
        Ok(())
    }
}
