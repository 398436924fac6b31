//! Lifecycle events: app install, uninstall, and plan changes.
//!
//! Install additionally fires the external setup trigger. The trigger is a
//! side effect outside the install record's consistency boundary: if it
//! fails, the install still succeeds and the location is flagged
//! `needs_manual_setup` for an operator to finish provisioning.

use chrono::Utc;
use tracing::{info, warn};

use crate::outbound::SetupTrigger;
use crate::store::{DomainStore, LocationRecord};
use crate::types::WebhookEnvelope;

use super::{ProcessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Install,
    Uninstall,
    PlanChange,
}

impl LifecycleEvent {
    fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "INSTALL" => Some(LifecycleEvent::Install),
            "UNINSTALL" => Some(LifecycleEvent::Uninstall),
            "PlanChange" => Some(LifecycleEvent::PlanChange),
            _ => None,
        }
    }
}

pub(crate) async fn process(
    domain: &dyn DomainStore,
    trigger: &dyn SetupTrigger,
    envelope: &WebhookEnvelope,
) -> Result<()> {
    let event = LifecycleEvent::parse(&envelope.event_type).ok_or(ProcessError::TaxonomyGap {
        family: "lifecycle",
        event_type: envelope.event_type.clone(),
    })?;
    let location = envelope.tenant.require_location()?;

    match event {
        LifecycleEvent::Install => {
            let plan = envelope
                .payload_str("planId")
                .or_else(|| envelope.payload_str("plan"))
                .unwrap_or_default();
            domain
                .upsert_location(LocationRecord {
                    location_id: location.to_string(),
                    company_id: envelope.tenant.company_id.clone(),
                    plan: plan.to_string(),
                    installed: true,
                    needs_manual_setup: false,
                    installed_at: Some(Utc::now()),
                    updated_at: Utc::now(),
                })
                .await?;
            info!(location_id = %location, "app installed");

            if let Err(error) = trigger.fire(location).await {
                warn!(location_id = %location, %error, "setup trigger failed, flagging for manual setup");
                domain.set_needs_manual_setup(location, true).await?;
            }
        }
        LifecycleEvent::Uninstall => {
            domain.mark_uninstalled(location).await?;
            info!(location_id = %location, "app uninstalled");
        }
        LifecycleEvent::PlanChange => {
            let plan = envelope
                .payload_str("planId")
                .or_else(|| envelope.payload_str("plan"))
                .unwrap_or_default();
            domain.update_plan(location, plan).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{NullSetupTrigger, TriggerError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingTrigger;

    #[async_trait]
    impl SetupTrigger for FailingTrigger {
        async fn fire(&self, _location_id: &str) -> std::result::Result<(), TriggerError> {
            Err(TriggerError::Status(reqwest::StatusCode::BAD_GATEWAY))
        }
    }

    struct CountingTrigger(AtomicUsize);

    #[async_trait]
    impl SetupTrigger for CountingTrigger {
        async fn fire(&self, _location_id: &str) -> std::result::Result<(), TriggerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope(body: Value) -> WebhookEnvelope {
        WebhookEnvelope::from_request(body, Utc::now())
    }

    #[tokio::test]
    async fn install_writes_location_and_fires_trigger() {
        let store = MemoryStore::new();
        let trigger = CountingTrigger(AtomicUsize::new(0));
        process(
            &store,
            &trigger,
            &envelope(json!({
                "type": "INSTALL",
                "locationId": "loc-1",
                "companyId": "co-1",
                "planId": "pro"
            })),
        )
        .await
        .unwrap();

        let location = store.get_location("loc-1").await.unwrap().unwrap();
        assert!(location.installed);
        assert!(!location.needs_manual_setup);
        assert_eq!(location.plan, "pro");
        assert_eq!(location.company_id.as_deref(), Some("co-1"));
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trigger_failure_flags_manual_setup_but_install_succeeds() {
        let store = MemoryStore::new();
        let result = process(
            &store,
            &FailingTrigger,
            &envelope(json!({ "type": "INSTALL", "locationId": "loc-1" })),
        )
        .await;
        assert!(result.is_ok());

        let location = store.get_location("loc-1").await.unwrap().unwrap();
        assert!(location.installed);
        assert!(location.needs_manual_setup);
    }

    #[tokio::test]
    async fn uninstall_clears_installed_flag() {
        let store = MemoryStore::new();
        process(
            &store,
            &NullSetupTrigger,
            &envelope(json!({ "type": "INSTALL", "locationId": "loc-1" })),
        )
        .await
        .unwrap();
        process(
            &store,
            &NullSetupTrigger,
            &envelope(json!({ "type": "UNINSTALL", "locationId": "loc-1" })),
        )
        .await
        .unwrap();

        let location = store.get_location("loc-1").await.unwrap().unwrap();
        assert!(!location.installed);
    }

    #[tokio::test]
    async fn plan_change_updates_only_the_plan() {
        let store = MemoryStore::new();
        process(
            &store,
            &NullSetupTrigger,
            &envelope(json!({ "type": "INSTALL", "locationId": "loc-1", "planId": "basic" })),
        )
        .await
        .unwrap();
        process(
            &store,
            &NullSetupTrigger,
            &envelope(json!({ "type": "PlanChange", "locationId": "loc-1", "planId": "pro" })),
        )
        .await
        .unwrap();

        let location = store.get_location("loc-1").await.unwrap().unwrap();
        assert_eq!(location.plan, "pro");
        assert!(location.installed);
    }

    #[tokio::test]
    async fn missing_location_is_a_hard_error() {
        let store = MemoryStore::new();
        let result = process(
            &store,
            &NullSetupTrigger,
            &envelope(json!({ "type": "INSTALL", "companyId": "co-1" })),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::MissingTenant(_))));
    }
}
