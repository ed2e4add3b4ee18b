//! In-memory gateway rule store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use eventsub_core::{GatewayRule, GatewayRuleStore, ResourceKey, StoreError};

const KIND: &str = "GatewayRule";

#[derive(Debug)]
pub struct InMemoryGatewayRuleStore {
    items: DashMap<ResourceKey, GatewayRule>,
    revision: AtomicU64,
    /// Readiness stamped on newly created rules
    initial_ready: std::sync::Mutex<Option<bool>>,
    fail_deletes: AtomicBool,
}

impl InMemoryGatewayRuleStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            revision: AtomicU64::new(1),
            initial_ready: std::sync::Mutex::new(Some(true)),
            fail_deletes: AtomicBool::new(false),
        }
    }

    fn next_revision(&self) -> Option<String> {
        Some(self.revision.fetch_add(1, Ordering::SeqCst).to_string())
    }

    /// Readiness the simulated gateway reports for rules created from now on.
    pub fn admit_new_rules_as(&self, ready: Option<bool>) {
        if let Ok(mut initial) = self.initial_ready.lock() {
            *initial = ready;
        }
    }

    /// Simulate the gateway reporting on an existing rule.
    pub fn set_ready(&self, key: &ResourceKey, ready: Option<bool>) -> bool {
        match self.items.get_mut(key) {
            Some(mut rule) => {
                rule.status.ready = ready;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, key: &ResourceKey) -> Option<GatewayRule> {
        self.items.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryGatewayRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayRuleStore for InMemoryGatewayRuleStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<GatewayRule>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn create(&self, rule: &GatewayRule) -> Result<GatewayRule, StoreError> {
        let key = rule.key();
        let initial_ready = self.initial_ready.lock().map(|r| *r).unwrap_or(Some(true));
        match self.items.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::already_exists(KIND, key)),
            Entry::Vacant(slot) => {
                let mut stored = rule.clone();
                stored.metadata.resource_version = self.next_revision();
                stored.status.ready = initial_ready;
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn update(&self, rule: &GatewayRule) -> Result<GatewayRule, StoreError> {
        let key = rule.key();
        let mut stored = self
            .items
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(KIND, key.clone()))?;
        if let Some(rv) = &rule.metadata.resource_version
            && stored.metadata.resource_version.as_ref() != Some(rv)
        {
            return Err(StoreError::conflict(KIND, key, "stale resource version"));
        }
        stored.metadata.labels = rule.metadata.labels.clone();
        stored.spec = rule.spec.clone();
        stored.metadata.resource_version = self.next_revision();
        Ok(stored.value().clone())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(format!("injected delete failure for {key}")));
        }
        self.items
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(KIND, key.clone()))
    }
}
