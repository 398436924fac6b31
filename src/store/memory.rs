//! In-memory store used by the tests and the default binary.
//!
//! All collections live behind one async mutex, which trivially satisfies
//! the atomicity contract: every trait method takes the lock once and does
//! all of its reads and writes inside the critical section. A database
//! backend has to reproduce the same guarantees with real transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::dedup::DedupPolicy;
use crate::queue::{NewQueueItem, QueueItem, QueueItemId, QueuePolicy, QueueStatus};
use crate::router::QueueName;
use crate::types::WebhookId;

use super::{
    AppointmentRecord, ContactRecord, ConversationRecord, ConversationUpsert, DedupStore,
    DiscoverySink, DomainStore, EnqueueOutcome, FinancialRecord, LocationRecord, MessageRecord,
    MessageWriteOutcome, MetricsStore, ProcessingPath, ProcessorMetrics, ProjectRecord, QueueStore,
    Result, StoreError, TimelineEntry,
};

#[derive(Debug, Clone)]
struct DedupEntry {
    recorded_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct DiscoveryEntry {
    event_type: String,
    payload: Value,
    seen_at: DateTime<Utc>,
}

type LocationKey = (String, String);

#[derive(Default)]
struct Inner {
    items: HashMap<QueueItemId, QueueItem>,
    dedup: HashMap<String, DedupEntry>,
    metrics: HashMap<WebhookId, ProcessorMetrics>,
    discovery: Vec<DiscoveryEntry>,

    contacts: HashMap<LocationKey, ContactRecord>,
    conversations: HashMap<LocationKey, ConversationRecord>,
    messages: HashMap<LocationKey, MessageRecord>,
    appointments: HashMap<LocationKey, AppointmentRecord>,
    locations: HashMap<String, LocationRecord>,
    projects: HashMap<LocationKey, ProjectRecord>,
    financials: HashMap<LocationKey, FinancialRecord>,
}

fn key(location_id: &str, id: &str) -> LocationKey {
    (location_id.to_string(), id.to_string())
}

/// Single-process implementation of every store trait.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    queue_policy: QueuePolicy,
    dedup_policy: DedupPolicy,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Mutex::new(Inner::default()),
            queue_policy: QueuePolicy::default(),
            dedup_policy: DedupPolicy::default(),
        }
    }

    /// Overrides the retry/lease policy (used by tests and config wiring).
    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    /// Overrides the duplicate-detection windows.
    pub fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    /// Unknown event types seen so far, oldest first.
    pub async fn unknown_event_types(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.discovery.iter().map(|e| e.event_type.clone()).collect()
    }

    /// The lifecycle record for one webhook, if any path has touched it.
    pub async fn metrics_for(&self, webhook_id: &WebhookId) -> Option<ProcessorMetrics> {
        let inner = self.inner.lock().await;
        inner.metrics.get(webhook_id).cloned()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, item: NewQueueItem) -> Result<EnqueueOutcome> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let duplicate = inner
            .items
            .values()
            .any(|existing| existing.webhook_id == item.webhook_id && existing.expires_at > now);
        if duplicate {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let id = QueueItemId::generate();
        let ttl = chrono::Duration::seconds(self.queue_policy.ttl.as_secs() as i64);
        inner.items.insert(
            id.clone(),
            QueueItem {
                id: id.clone(),
                webhook_id: item.webhook_id,
                event_type: item.event_type,
                queue: item.queue,
                priority: item.priority,
                payload: item.payload,
                tenant: item.tenant,
                status: QueueStatus::Pending,
                attempts: 0,
                max_attempts: self.queue_policy.max_attempts,
                received_at: item.received_at,
                process_after: now,
                locked_until: None,
                processing_started: None,
                last_error: None,
                expires_at: now + ttl,
            },
        );
        Ok(EnqueueOutcome::Inserted(id))
    }

    async fn lease_batch(&self, queue: QueueName, limit: usize) -> Result<Vec<QueueItem>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        // Reclaim expired leases before selection so that work stranded by a
        // crashed worker is visible again.
        for item in inner.items.values_mut() {
            if item.status == QueueStatus::Processing
                && item.locked_until.map_or(true, |until| until <= now)
            {
                item.status = QueueStatus::Pending;
                item.locked_until = None;
            }
        }

        let mut candidates: Vec<_> = inner
            .items
            .values()
            .filter(|item| item.queue == queue && item.is_eligible(now))
            .map(|item| (item.priority, item.received_at, item.id.clone()))
            .collect();
        candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        candidates.truncate(limit);
        let eligible: Vec<QueueItemId> = candidates.into_iter().map(|(_, _, id)| id).collect();

        let expiry = self.queue_policy.lease.expiry(now);
        let mut leased = Vec::with_capacity(eligible.len());
        for id in eligible {
            let item = inner
                .items
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            item.status = QueueStatus::Processing;
            item.locked_until = Some(expiry);
            item.processing_started = Some(now);
            leased.push(item.clone());
        }
        Ok(leased)
    }

    async fn mark_completed(&self, id: &QueueItemId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        item.status = QueueStatus::Completed;
        item.locked_until = None;
        Ok(())
    }

    async fn mark_failed(&self, id: &QueueItemId, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        item.attempts += 1;
        item.status = QueueStatus::Failed;
        item.last_error = Some(error.to_string());
        item.locked_until = None;
        item.process_after = self.queue_policy.backoff.retry_at(now, item.attempts);
        Ok(())
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<usize> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .values()
            .filter(|item| {
                item.queue == queue
                    && item.status != QueueStatus::Completed
                    && item.expires_at > now
            })
            .count())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let before = inner.items.len();
        inner.items.retain(|_, item| item.expires_at > now);
        Ok(before - inner.items.len())
    }

    async fn find_by_webhook_id(&self, webhook_id: &WebhookId) -> Result<Option<QueueItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .values()
            .find(|item| &item.webhook_id == webhook_id)
            .cloned())
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn check_and_record(&self, hash: &str) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.dedup.retain(|_, entry| entry.expires_at > now);

        let window = chrono::Duration::seconds(self.dedup_policy.window.as_secs() as i64);
        let duplicate = inner
            .dedup
            .get(hash)
            .map_or(false, |entry| now - entry.recorded_at <= window);

        let expiry = chrono::Duration::seconds(self.dedup_policy.expiry.as_secs() as i64);
        inner.dedup.insert(
            hash.to_string(),
            DedupEntry {
                recorded_at: now,
                expires_at: now + expiry,
            },
        );
        Ok(duplicate)
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn record_received(&self, webhook_id: &WebhookId, event_type: &str) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner
            .metrics
            .entry(webhook_id.clone())
            .and_modify(|m| m.event_type = event_type.to_string())
            .or_insert_with(|| ProcessorMetrics {
                webhook_id: webhook_id.clone(),
                event_type: event_type.to_string(),
                received_at: now,
                started_at: None,
                finished_at: None,
                path: None,
                success: None,
                error: None,
            });
        Ok(())
    }

    async fn record_started(&self, webhook_id: &WebhookId, path: ProcessingPath) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let entry = inner
            .metrics
            .entry(webhook_id.clone())
            .or_insert_with(|| ProcessorMetrics {
                webhook_id: webhook_id.clone(),
                event_type: String::new(),
                received_at: now,
                started_at: None,
                finished_at: None,
                path: None,
                success: None,
                error: None,
            });
        // First path to start wins the attribution.
        if entry.started_at.is_none() {
            entry.started_at = Some(now);
            entry.path = Some(path);
        }
        Ok(())
    }

    async fn record_finished(
        &self,
        webhook_id: &WebhookId,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let entry = inner
            .metrics
            .get_mut(webhook_id)
            .ok_or_else(|| StoreError::NotFound(webhook_id.to_string()))?;
        entry.finished_at = Some(now);
        entry.success = Some(success);
        entry.error = error.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl DiscoverySink for MemoryStore {
    async fn record_unknown(&self, event_type: &str, payload: &Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.discovery.push(DiscoveryEntry {
            event_type: event_type.to_string(),
            payload: payload.clone(),
            seen_at: Utc::now(),
        });
        Ok(())
    }
}

fn minimal_contact(id: &str, now: DateTime<Utc>) -> ContactRecord {
    ContactRecord {
        id: id.to_string(),
        email: String::new(),
        name: String::new(),
        phone: String::new(),
        dnd: false,
        tags: Vec::new(),
        updated_at: now,
    }
}

fn minimal_location(location_id: &str, now: DateTime<Utc>) -> LocationRecord {
    LocationRecord {
        location_id: location_id.to_string(),
        company_id: None,
        plan: String::new(),
        installed: false,
        needs_manual_setup: false,
        installed_at: None,
        updated_at: now,
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn upsert_contact(&self, location_id: &str, contact: ContactRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let k = key(location_id, &contact.id);
        match inner.contacts.get_mut(&k) {
            Some(existing) => {
                // Tags and DND are owned by their own event types; a plain
                // contact upsert must not clobber them.
                let tags = std::mem::take(&mut existing.tags);
                let dnd = existing.dnd;
                *existing = contact;
                existing.tags = tags;
                existing.dnd = dnd;
            }
            None => {
                inner.contacts.insert(k, contact);
            }
        }
        Ok(())
    }

    async fn delete_contact(&self, location_id: &str, contact_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.contacts.remove(&key(location_id, contact_id));
        Ok(())
    }

    async fn set_contact_dnd(&self, location_id: &str, contact_id: &str, dnd: bool) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let contact = inner
            .contacts
            .entry(key(location_id, contact_id))
            .or_insert_with(|| minimal_contact(contact_id, now));
        contact.dnd = dnd;
        contact.updated_at = now;
        Ok(())
    }

    async fn set_contact_tags(
        &self,
        location_id: &str,
        contact_id: &str,
        tags: Vec<String>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let contact = inner
            .contacts
            .entry(key(location_id, contact_id))
            .or_insert_with(|| minimal_contact(contact_id, now));
        contact.tags = tags;
        contact.updated_at = now;
        Ok(())
    }

    async fn record_message(
        &self,
        location_id: &str,
        conversation: ConversationUpsert,
        message: MessageRecord,
    ) -> Result<MessageWriteOutcome> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let conv_key = key(location_id, &conversation.id);
        let conversation_created = !inner.conversations.contains_key(&conv_key);
        if conversation_created {
            inner.conversations.insert(
                conv_key.clone(),
                ConversationRecord {
                    id: conversation.id.clone(),
                    contact_id: conversation.contact_id.clone(),
                    unread_count: 0,
                    last_message_body: String::new(),
                    last_message_at: None,
                    updated_at: now,
                },
            );
        }

        let msg_key = key(location_id, &message.id);
        let message_inserted = !inner.messages.contains_key(&msg_key);
        if message_inserted {
            let direction = message.direction;
            let body = message.body.clone();
            let message_id = message.id.clone();
            let contact_id = message.contact_id.clone();
            inner.messages.insert(msg_key, message);

            let conv = inner
                .conversations
                .get_mut(&conv_key)
                .ok_or_else(|| StoreError::NotFound(conversation.id.clone()))?;
            match direction {
                super::MessageDirection::Inbound => conv.unread_count += 1,
                super::MessageDirection::Outbound => conv.unread_count = 0,
            }
            conv.last_message_body = body;
            conv.last_message_at = Some(now);
            conv.updated_at = now;

            if direction == super::MessageDirection::Inbound {
                let project = inner
                    .projects
                    .values_mut()
                    .find(|p| p.active && p.contact_id == contact_id);
                if let Some(project) = project {
                    project.timeline.push(TimelineEntry {
                        note: format!("Inbound message {message_id}"),
                        at: now,
                    });
                }
            }
        }

        Ok(MessageWriteOutcome {
            message_inserted,
            conversation_created,
        })
    }

    async fn set_unread(&self, location_id: &str, conversation_id: &str, count: u32) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let conv = inner
            .conversations
            .entry(key(location_id, conversation_id))
            .or_insert_with(|| ConversationRecord {
                id: conversation_id.to_string(),
                contact_id: String::new(),
                unread_count: 0,
                last_message_body: String::new(),
                last_message_at: None,
                updated_at: now,
            });
        conv.unread_count = count;
        conv.updated_at = now;
        Ok(())
    }

    async fn apply_email_stats(
        &self,
        location_id: &str,
        message_id: &str,
        stats: Value,
    ) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .entry(key(location_id, message_id))
            .or_insert_with(|| MessageRecord {
                id: message_id.to_string(),
                conversation_id: String::new(),
                contact_id: String::new(),
                direction: super::MessageDirection::Outbound,
                message_type: "Email".to_string(),
                body: String::new(),
                email_stats: None,
                created_at: now,
            });
        message.email_stats = Some(stats);
        Ok(())
    }

    async fn upsert_appointment(
        &self,
        location_id: &str,
        appointment: AppointmentRecord,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .appointments
            .insert(key(location_id, &appointment.id), appointment);
        Ok(())
    }

    async fn delete_appointment(&self, location_id: &str, appointment_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.appointments.remove(&key(location_id, appointment_id));
        Ok(())
    }

    async fn upsert_location(&self, location: LocationRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .locations
            .insert(location.location_id.clone(), location);
        Ok(())
    }

    async fn mark_uninstalled(&self, location_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let location = inner
            .locations
            .entry(location_id.to_string())
            .or_insert_with(|| minimal_location(location_id, now));
        location.installed = false;
        location.updated_at = now;
        Ok(())
    }

    async fn update_plan(&self, location_id: &str, plan: &str) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let location = inner
            .locations
            .entry(location_id.to_string())
            .or_insert_with(|| minimal_location(location_id, now));
        location.plan = plan.to_string();
        location.updated_at = now;
        Ok(())
    }

    async fn set_needs_manual_setup(&self, location_id: &str, needs: bool) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let location = inner
            .locations
            .entry(location_id.to_string())
            .or_insert_with(|| minimal_location(location_id, now));
        location.needs_manual_setup = needs;
        location.updated_at = now;
        Ok(())
    }

    async fn upsert_financial(&self, location_id: &str, record: FinancialRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.financials.insert(key(location_id, &record.id), record);
        Ok(())
    }

    async fn upsert_project(&self, location_id: &str, project: ProjectRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.projects.insert(key(location_id, &project.id), project);
        Ok(())
    }

    async fn get_contact(
        &self,
        location_id: &str,
        contact_id: &str,
    ) -> Result<Option<ContactRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.contacts.get(&key(location_id, contact_id)).cloned())
    }

    async fn get_conversation(
        &self,
        location_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conversations
            .get(&key(location_id, conversation_id))
            .cloned())
    }

    async fn get_message(
        &self,
        location_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.get(&key(location_id, message_id)).cloned())
    }

    async fn get_appointment(
        &self,
        location_id: &str,
        appointment_id: &str,
    ) -> Result<Option<AppointmentRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .appointments
            .get(&key(location_id, appointment_id))
            .cloned())
    }

    async fn get_location(&self, location_id: &str) -> Result<Option<LocationRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.locations.get(location_id).cloned())
    }

    async fn get_financial(
        &self,
        location_id: &str,
        record_id: &str,
    ) -> Result<Option<FinancialRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.financials.get(&key(location_id, record_id)).cloned())
    }

    async fn get_project(
        &self,
        location_id: &str,
        project_id: &str,
    ) -> Result<Option<ProjectRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.projects.get(&key(location_id, project_id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::super::MessageDirection;
    use super::*;
    use crate::queue::{BackoffPolicy, LeasePolicy};
    use crate::router::Priority;
    use crate::types::Tenant;
    use serde_json::json;
    use std::time::Duration;

    fn new_item(webhook_id: &str, priority: u8, queue: QueueName) -> NewQueueItem {
        NewQueueItem {
            webhook_id: WebhookId::new(webhook_id),
            event_type: "ContactCreate".to_string(),
            queue,
            priority: Priority(priority),
            payload: json!({"id": webhook_id}),
            tenant: Tenant::location("loc-1"),
            received_at: Utc::now(),
        }
    }

    fn message(id: &str, conversation: &str, direction: MessageDirection) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            conversation_id: conversation.to_string(),
            contact_id: "ct-1".to_string(),
            direction,
            message_type: "SMS".to_string(),
            body: "hello".to_string(),
            email_stats: None,
            created_at: Utc::now(),
        }
    }

    // ─── Queue ───

    #[tokio::test]
    async fn duplicate_webhook_id_yields_single_live_item() {
        let store = MemoryStore::new();
        let first = store.enqueue(new_item("wh-1", 4, QueueName::Contacts)).await.unwrap();
        assert!(matches!(first, EnqueueOutcome::Inserted(_)));

        let second = store.enqueue(new_item("wh-1", 4, QueueName::Contacts)).await.unwrap();
        assert_eq!(second, EnqueueOutcome::Duplicate);

        assert_eq!(store.queue_depth(QueueName::Contacts).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lease_orders_by_priority_then_arrival() {
        let store = MemoryStore::new();
        store.enqueue(new_item("wh-low", 5, QueueName::General)).await.unwrap();
        store.enqueue(new_item("wh-high", 1, QueueName::General)).await.unwrap();
        store.enqueue(new_item("wh-mid", 3, QueueName::General)).await.unwrap();

        let batch = store.lease_batch(QueueName::General, 10).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|i| i.webhook_id.as_str()).collect();
        assert_eq!(ids, vec!["wh-high", "wh-mid", "wh-low"]);
    }

    #[tokio::test]
    async fn leased_items_are_not_leased_twice() {
        let store = MemoryStore::new();
        store.enqueue(new_item("wh-1", 2, QueueName::Messages)).await.unwrap();

        let first = store.lease_batch(QueueName::Messages, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, QueueStatus::Processing);
        assert!(first[0].locked_until.is_some());

        let second = store.lease_batch(QueueName::Messages, 10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_and_stolen() {
        let store = MemoryStore::new().with_queue_policy(QueuePolicy {
            lease: LeasePolicy { duration: Duration::ZERO },
            ..QueuePolicy::default()
        });
        store.enqueue(new_item("wh-1", 2, QueueName::Messages)).await.unwrap();

        let first = store.lease_batch(QueueName::Messages, 10).await.unwrap();
        assert_eq!(first.len(), 1);

        // Zero-length lease expires immediately, so a second leaser steals.
        let second = store.lease_batch(QueueName::Messages, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
    }

    #[tokio::test]
    async fn mark_failed_backs_off_exponentially() {
        let store = MemoryStore::new();
        store.enqueue(new_item("wh-1", 2, QueueName::Messages)).await.unwrap();
        let leased = store.lease_batch(QueueName::Messages, 1).await.unwrap();
        let id = leased[0].id.clone();

        store.mark_failed(&id, "boom").await.unwrap();
        let item = store
            .find_by_webhook_id(&WebhookId::new("wh-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.last_error.as_deref(), Some("boom"));
        assert!(item.locked_until.is_none());

        let wait = item.process_after - Utc::now();
        assert!(wait > chrono::Duration::seconds(55), "wait was {wait}");
        assert!(wait <= chrono::Duration::seconds(60));

        // Second failure doubles the wait.
        store.mark_failed(&id, "boom again").await.unwrap();
        let item = store
            .find_by_webhook_id(&WebhookId::new("wh-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.attempts, 2);
        let wait = item.process_after - Utc::now();
        assert!(wait > chrono::Duration::seconds(115), "wait was {wait}");
        assert!(wait <= chrono::Duration::seconds(120));
    }

    #[tokio::test]
    async fn exhausted_items_stop_being_leased() {
        let store = MemoryStore::new().with_queue_policy(QueuePolicy {
            backoff: BackoffPolicy {
                base: Duration::ZERO,
                max: Duration::ZERO,
            },
            max_attempts: 2,
            ..QueuePolicy::default()
        });
        store.enqueue(new_item("wh-1", 2, QueueName::Messages)).await.unwrap();

        for _ in 0..2 {
            let leased = store.lease_batch(QueueName::Messages, 1).await.unwrap();
            assert_eq!(leased.len(), 1);
            store.mark_failed(&leased[0].id, "boom").await.unwrap();
        }

        assert!(store.lease_batch(QueueName::Messages, 1).await.unwrap().is_empty());
        let item = store
            .find_by_webhook_id(&WebhookId::new("wh-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(item.is_dead_letter());
    }

    #[tokio::test]
    async fn completed_items_leave_the_depth_count() {
        let store = MemoryStore::new();
        store.enqueue(new_item("wh-1", 2, QueueName::Messages)).await.unwrap();
        let leased = store.lease_batch(QueueName::Messages, 1).await.unwrap();
        store.mark_completed(&leased[0].id).await.unwrap();
        assert_eq!(store.queue_depth(QueueName::Messages).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_removes_expired_items() {
        let store = MemoryStore::new().with_queue_policy(QueuePolicy {
            ttl: Duration::ZERO,
            ..QueuePolicy::default()
        });
        store.enqueue(new_item("wh-1", 2, QueueName::Messages)).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store
            .find_by_webhook_id(&WebhookId::new("wh-1"))
            .await
            .unwrap()
            .is_none());
    }

    // ─── Dedup ───

    #[tokio::test]
    async fn repeated_hash_within_window_is_duplicate() {
        let store = MemoryStore::new();
        assert!(!store.check_and_record("abc123").await.unwrap());
        assert!(store.check_and_record("abc123").await.unwrap());
        assert!(!store.check_and_record("other").await.unwrap());
    }

    // ─── Metrics ───

    #[tokio::test]
    async fn first_path_to_start_wins_attribution() {
        let store = MemoryStore::new();
        let id = WebhookId::new("wh-1");
        store.record_received(&id, "InboundMessage").await.unwrap();
        store.record_started(&id, ProcessingPath::Direct).await.unwrap();
        store.record_started(&id, ProcessingPath::Queued).await.unwrap();
        store.record_finished(&id, true, None).await.unwrap();

        let metrics = store.metrics_for(&id).await.unwrap();
        assert_eq!(metrics.path, Some(ProcessingPath::Direct));
        assert_eq!(metrics.success, Some(true));
        assert!(metrics.finished_at.is_some());
    }

    // ─── Domain writes ───

    #[tokio::test]
    async fn inbound_message_increments_unread_once() {
        let store = MemoryStore::new();
        let conv = ConversationUpsert {
            id: "cv-1".to_string(),
            contact_id: "ct-1".to_string(),
        };

        let outcome = store
            .record_message("loc-1", conv.clone(), message("msg-1", "cv-1", MessageDirection::Inbound))
            .await
            .unwrap();
        assert!(outcome.message_inserted);
        assert!(outcome.conversation_created);

        // Replay of the same message is a no-op.
        let replay = store
            .record_message("loc-1", conv, message("msg-1", "cv-1", MessageDirection::Inbound))
            .await
            .unwrap();
        assert!(!replay.message_inserted);

        let conversation = store.get_conversation("loc-1", "cv-1").await.unwrap().unwrap();
        assert_eq!(conversation.unread_count, 1);
        assert_eq!(conversation.last_message_body, "hello");
    }

    #[tokio::test]
    async fn outbound_message_resets_unread() {
        let store = MemoryStore::new();
        let conv = ConversationUpsert {
            id: "cv-1".to_string(),
            contact_id: "ct-1".to_string(),
        };
        store
            .record_message("loc-1", conv.clone(), message("msg-1", "cv-1", MessageDirection::Inbound))
            .await
            .unwrap();
        store
            .record_message("loc-1", conv, message("msg-2", "cv-1", MessageDirection::Outbound))
            .await
            .unwrap();

        let conversation = store.get_conversation("loc-1", "cv-1").await.unwrap().unwrap();
        assert_eq!(conversation.unread_count, 0);
    }

    #[tokio::test]
    async fn inbound_message_stamps_active_project_timeline() {
        let store = MemoryStore::new();
        store
            .upsert_project(
                "loc-1",
                ProjectRecord {
                    id: "pr-1".to_string(),
                    contact_id: "ct-1".to_string(),
                    active: true,
                    timeline: Vec::new(),
                },
            )
            .await
            .unwrap();

        let conv = ConversationUpsert {
            id: "cv-1".to_string(),
            contact_id: "ct-1".to_string(),
        };
        store
            .record_message("loc-1", conv, message("msg-1", "cv-1", MessageDirection::Inbound))
            .await
            .unwrap();

        let project = store.get_project("loc-1", "pr-1").await.unwrap().unwrap();
        assert_eq!(project.timeline.len(), 1);
        assert!(project.timeline[0].note.contains("msg-1"));
    }

    #[tokio::test]
    async fn dnd_update_before_create_makes_minimal_contact() {
        let store = MemoryStore::new();
        store.set_contact_dnd("loc-1", "ct-9", true).await.unwrap();
        let contact = store.get_contact("loc-1", "ct-9").await.unwrap().unwrap();
        assert!(contact.dnd);
        assert!(contact.email.is_empty());
    }

    #[tokio::test]
    async fn contact_upsert_preserves_tags_and_dnd() {
        let store = MemoryStore::new();
        store
            .set_contact_tags("loc-1", "ct-1", vec!["vip".to_string()])
            .await
            .unwrap();
        store.set_contact_dnd("loc-1", "ct-1", true).await.unwrap();

        let now = Utc::now();
        store
            .upsert_contact(
                "loc-1",
                ContactRecord {
                    id: "ct-1".to_string(),
                    email: "a@b.test".to_string(),
                    name: "Ada".to_string(),
                    phone: String::new(),
                    dnd: false,
                    tags: Vec::new(),
                    updated_at: now,
                },
            )
            .await
            .unwrap();

        let contact = store.get_contact("loc-1", "ct-1").await.unwrap().unwrap();
        assert_eq!(contact.email, "a@b.test");
        assert_eq!(contact.tags, vec!["vip".to_string()]);
        assert!(contact.dnd);
    }

    #[tokio::test]
    async fn email_stats_before_message_create_a_stub() {
        let store = MemoryStore::new();
        store
            .apply_email_stats("loc-1", "msg-1", json!({"opened": 2}))
            .await
            .unwrap();
        let msg = store.get_message("loc-1", "msg-1").await.unwrap().unwrap();
        assert_eq!(msg.email_stats, Some(json!({"opened": 2})));
    }
}
