//! In-memory Subscription store.
//!
//! Mimics an API server: every write bumps a resource version, stale
//! writes are rejected, spec changes bump the generation, and an object
//! marked for deletion disappears once its last finalizer is removed.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use eventsub_core::{ResourceKey, StoreError, Subscription, SubscriptionSpec, SubscriptionStore};
use time::OffsetDateTime;
use tokio::sync::broadcast;

const KIND: &str = "Subscription";
const CHANGE_BUFFER_SIZE: usize = 1024;

#[derive(Debug)]
pub struct InMemorySubscriptionStore {
    items: DashMap<ResourceKey, Subscription>,
    revision: AtomicU64,
    changes: broadcast::Sender<ResourceKey>,
    status_writes: AtomicUsize,
    fail_list: AtomicBool,
    fail_updates: DashSet<ResourceKey>,
    fail_status_updates: DashSet<ResourceKey>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER_SIZE);
        Self {
            items: DashMap::new(),
            revision: AtomicU64::new(1),
            changes,
            status_writes: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
            fail_updates: DashSet::new(),
            fail_status_updates: DashSet::new(),
        }
    }

    fn next_revision(&self) -> Option<String> {
        Some(self.revision.fetch_add(1, Ordering::SeqCst).to_string())
    }

    fn notify(&self, key: ResourceKey) {
        let _ = self.changes.send(key);
    }

    fn check_revision(stored: &Subscription, incoming: &Subscription) -> Result<(), StoreError> {
        match &incoming.metadata.resource_version {
            Some(rv) if stored.metadata.resource_version.as_ref() != Some(rv) => {
                Err(StoreError::conflict(
                    KIND,
                    incoming.key(),
                    format!(
                        "resource version {rv} is stale, current is {}",
                        stored.metadata.resource_version.as_deref().unwrap_or("")
                    ),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Store a new Subscription as a user would create it.
    pub fn insert(&self, mut subscription: Subscription) -> Subscription {
        if subscription.metadata.uid.is_empty() {
            subscription.metadata.uid = uuid::Uuid::new_v4().to_string();
        }
        subscription.metadata.generation = subscription.metadata.generation.max(1);
        subscription.metadata.resource_version = self.next_revision();
        let key = subscription.key();
        self.items.insert(key.clone(), subscription.clone());
        self.notify(key);
        subscription
    }

    /// Change the spec as a user would. Bumps the generation.
    pub fn update_spec(
        &self,
        key: &ResourceKey,
        change: impl FnOnce(&mut SubscriptionSpec),
    ) -> Result<Subscription, StoreError> {
        let updated = {
            let mut stored = self
                .items
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(KIND, key.clone()))?;
            change(&mut stored.spec);
            stored.metadata.generation += 1;
            stored.metadata.resource_version = self.next_revision();
            stored.value().clone()
        };
        self.notify(key.clone());
        Ok(updated)
    }

    /// Request deletion. Objects without finalizers go away immediately.
    pub fn mark_deleted(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let gone = {
            let mut stored = self
                .items
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(KIND, key.clone()))?;
            if stored.metadata.finalizers.is_empty() {
                true
            } else {
                if stored.metadata.deletion_timestamp.is_none() {
                    stored.metadata.deletion_timestamp = Some(OffsetDateTime::now_utc());
                }
                stored.metadata.resource_version = self.next_revision();
                false
            }
        };
        if gone {
            self.items.remove(key);
        }
        self.notify(key.clone());
        Ok(())
    }

    pub fn snapshot(&self, key: &ResourceKey) -> Option<Subscription> {
        self.items.get(key).map(|s| s.value().clone())
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys of created, changed or deleted Subscriptions. Status writes
    /// are not announced.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ResourceKey> {
        self.changes.subscribe()
    }

    pub fn status_write_count(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates_for(&self, key: ResourceKey) {
        self.fail_updates.insert(key);
    }

    pub fn fail_status_updates_for(&self, key: ResourceKey) {
        self.fail_status_updates.insert(key);
    }

    pub fn clear_failures(&self) {
        self.fail_list.store(false, Ordering::SeqCst);
        self.fail_updates.clear();
        self.fail_status_updates.clear();
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected list failure"));
        }
        let mut all: Vec<Subscription> = self.items.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(all)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Subscription>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn update(&self, subscription: &Subscription) -> Result<Subscription, StoreError> {
        let key = subscription.key();
        if self.fail_updates.contains(&key) {
            return Err(StoreError::unavailable(format!("injected update failure for {key}")));
        }

        let (updated, gone) = {
            let mut stored = self
                .items
                .get_mut(&key)
                .ok_or_else(|| StoreError::not_found(KIND, key.clone()))?;
            Self::check_revision(&stored, subscription)?;

            stored.metadata.labels = subscription.metadata.labels.clone();
            stored.metadata.finalizers = subscription.metadata.finalizers.clone();
            if stored.spec != subscription.spec {
                stored.spec = subscription.spec.clone();
                stored.metadata.generation += 1;
            }
            stored.metadata.resource_version = self.next_revision();
            let gone = stored.metadata.deletion_timestamp.is_some()
                && stored.metadata.finalizers.is_empty();
            (stored.value().clone(), gone)
        };

        if gone {
            self.items.remove(&key);
            tracing::debug!(subscription = %key, "Finalizers cleared, subscription removed");
        }
        Ok(updated)
    }

    async fn update_status(&self, subscription: &Subscription) -> Result<Subscription, StoreError> {
        let key = subscription.key();
        if self.fail_status_updates.contains(&key) {
            return Err(StoreError::unavailable(format!(
                "injected status update failure for {key}"
            )));
        }

        let mut stored = self
            .items
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(KIND, key.clone()))?;
        Self::check_revision(&stored, subscription)?;
        stored.status = subscription.status.clone();
        stored.metadata.resource_version = self.next_revision();
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.value().clone())
    }
}
