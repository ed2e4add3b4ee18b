//! Gateway rules exposing cluster-local sinks to the event mesh.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::subscription::{ObjectMeta, ResourceKey};

/// Label marking gateway rules created by this controller.
pub const MANAGED_BY_LABEL: &str = "eventing.eventsub.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "eventsub-controller";

/// Prefix of generated gateway rule names.
pub const GATEWAY_RULE_PREFIX: &str = "webhook-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayService {
    pub name: String,
    pub namespace: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPath {
    pub path: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRuleSpec {
    /// Externally reachable host
    pub host: String,
    pub service: GatewayService,
    #[serde(default)]
    pub rules: Vec<GatewayPath>,
    /// Subscriptions sharing this rule
    #[serde(default)]
    pub owners: Vec<ResourceKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRuleStatus {
    /// `None` until the gateway reports back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRule {
    pub metadata: ObjectMeta,
    pub spec: GatewayRuleSpec,
    #[serde(default)]
    pub status: GatewayRuleStatus,
}

impl GatewayRule {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: GatewayRuleSpec) -> Self {
        let mut metadata = ObjectMeta::new(namespace, name);
        metadata.labels = BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )]);
        Self {
            metadata,
            spec,
            status: GatewayRuleStatus::default(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.metadata.key()
    }

    /// Only an explicit `false` from the gateway counts as not ready.
    pub fn is_ready(&self) -> bool {
        self.status.ready != Some(false)
    }

    pub fn has_owner(&self, owner: &ResourceKey) -> bool {
        self.spec.owners.contains(owner)
    }

    /// Returns `true` when the owner was added.
    pub fn add_owner(&mut self, owner: ResourceKey) -> bool {
        if self.has_owner(&owner) {
            return false;
        }
        self.spec.owners.push(owner);
        self.spec.owners.sort();
        true
    }

    /// Returns `true` when the owner was present.
    pub fn remove_owner(&mut self, owner: &ResourceKey) -> bool {
        let before = self.spec.owners.len();
        self.spec.owners.retain(|o| o != owner);
        before != self.spec.owners.len()
    }

    /// Public URL of `path` on the sink service behind this rule.
    pub fn external_url(&self, path: &str) -> String {
        format!("https://{}{}", self.spec.host, path)
    }
}
