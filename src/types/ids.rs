//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID kinds (e.g., using a
//! contact's external ID where a webhook ID is expected) and make function
//! signatures self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unique ID of a webhook delivery.
///
/// Supplied by the CRM in the payload (`webhookId`) or generated locally when
/// absent. At most one live queue item exists per webhook ID within the
/// retention window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl WebhookId {
    /// Creates a new WebhookId from a string.
    pub fn new(s: impl Into<String>) -> Self {
        WebhookId(s.into())
    }

    /// Generates a fresh random webhook ID.
    ///
    /// Used when the sender did not supply one; the generated ID still
    /// participates in queue-level uniqueness.
    pub fn generate() -> Self {
        WebhookId(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WebhookId {
    fn from(s: String) -> Self {
        WebhookId(s)
    }
}

impl From<&str> for WebhookId {
    fn from(s: &str) -> Self {
        WebhookId(s.to_string())
    }
}

/// Tenant identifiers scoping all domain data and queue items.
///
/// The CRM scopes data by location (a sub-account) and optionally by the
/// owning company. Most events carry a `locationId`; lifecycle events may
/// carry only a `companyId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant {
    /// The location (sub-account) identifier, if present.
    pub location_id: Option<String>,

    /// The company identifier, if present.
    pub company_id: Option<String>,
}

impl Tenant {
    /// Creates a tenant with only a location ID.
    pub fn location(id: impl Into<String>) -> Self {
        Tenant {
            location_id: Some(id.into()),
            company_id: None,
        }
    }

    /// Returns the location ID, or an error if absent.
    ///
    /// Processors that write location-scoped domain records require this;
    /// a missing location ID is a hard error, not a silent skip.
    pub fn require_location(&self) -> Result<&str, MissingTenant> {
        self.location_id.as_deref().ok_or(MissingTenant)
    }

    /// Returns true if neither identifier is present.
    pub fn is_empty(&self) -> bool {
        self.location_id.is_none() && self.company_id.is_none()
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.location_id, &self.company_id) {
            (Some(l), Some(c)) => write!(f, "{}/{}", l, c),
            (Some(l), None) => write!(f, "{}", l),
            (None, Some(c)) => write!(f, "-/{}", c),
            (None, None) => write!(f, "-"),
        }
    }
}

/// Error returned when a required tenant location ID is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("missing required location ID on event")]
pub struct MissingTenant;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_webhook_ids_are_unique() {
        let a = WebhookId::generate();
        let b = WebhookId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn require_location_present() {
        let tenant = Tenant::location("loc-1");
        assert_eq!(tenant.require_location().unwrap(), "loc-1");
    }

    #[test]
    fn require_location_absent_is_error() {
        let tenant = Tenant {
            location_id: None,
            company_id: Some("co-1".to_string()),
        };
        assert!(tenant.require_location().is_err());
    }

    #[test]
    fn tenant_display() {
        assert_eq!(Tenant::location("l1").to_string(), "l1");
        assert_eq!(Tenant::default().to_string(), "-");
    }

    #[test]
    fn webhook_id_serde_is_transparent() {
        let id = WebhookId::new("wh-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"wh-1\"");
        let parsed: WebhookId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
