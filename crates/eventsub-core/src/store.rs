//! Resource store traits.
//!
//! The controller never talks to a concrete API server. Subscriptions and
//! gateway rules are read and written through these traits so that the
//! same reconciliation code runs against a real cluster client or the
//! in-memory stores used in tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::gateway::GatewayRule;
use crate::subscription::{ResourceKey, Subscription};

/// Access to Subscription resources.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Lists every Subscription in every namespace.
    async fn list(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Reads one Subscription.
    ///
    /// Returns `None` if it does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<Option<Subscription>, StoreError>;

    /// Writes metadata and spec (finalizers included). Status is ignored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if `metadata.resource_version` is stale.
    /// Returns `StoreError::NotFound` if the Subscription is gone.
    async fn update(&self, subscription: &Subscription) -> Result<Subscription, StoreError>;

    /// Writes the status subresource. Metadata and spec are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if `metadata.resource_version` is stale.
    /// Returns `StoreError::NotFound` if the Subscription is gone.
    async fn update_status(&self, subscription: &Subscription) -> Result<Subscription, StoreError>;
}

/// Access to gateway rules.
#[async_trait]
pub trait GatewayRuleStore: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> Result<Option<GatewayRule>, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a rule with the same key exists.
    async fn create(&self, rule: &GatewayRule) -> Result<GatewayRule, StoreError>;

    async fn update(&self, rule: &GatewayRule) -> Result<GatewayRule, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the rule does not exist.
    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError>;
}

pub type DynSubscriptionStore = Arc<dyn SubscriptionStore>;
pub type DynGatewayRuleStore = Arc<dyn GatewayRuleStore>;
