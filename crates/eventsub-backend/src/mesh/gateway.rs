//! Gateway rule bookkeeping for the event mesh backend.
//!
//! One rule exposes one sink service port. Subscriptions pointing at the
//! same service share the rule and are tracked as its owners; the rule is
//! deleted when its last owner lets go. The shutdown sweep purges rules
//! without looking at owners.

use eventsub_core::gateway::GATEWAY_RULE_PREFIX;
use eventsub_core::{
    DynGatewayRuleStore, GatewayPath, GatewayRule, GatewayRuleSpec, GatewayService, ResourceKey,
};
use sha2::{Digest, Sha256};

use crate::error::BackendError;
use crate::sink::ClusterLocalSink;

const RULE_HASH_LENGTH: usize = 40;
const RULE_PATH: &str = "/.*";
const RULE_METHODS: [&str; 2] = ["POST", "OPTIONS"];

/// Deterministic rule name for a sink service port.
pub fn gateway_rule_name(sink: &ClusterLocalSink) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sink.namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(sink.service.as_bytes());
    hasher.update(b":");
    hasher.update(sink.port.to_string().as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{GATEWAY_RULE_PREFIX}{}", &hash[..RULE_HASH_LENGTH])
}

pub struct GatewayRules {
    store: DynGatewayRuleStore,
    domain: String,
}

impl GatewayRules {
    pub fn new(store: DynGatewayRuleStore, domain: impl Into<String>) -> Self {
        Self {
            store,
            domain: domain.into(),
        }
    }

    fn desired_spec(&self, name: &str, sink: &ClusterLocalSink) -> GatewayRuleSpec {
        GatewayRuleSpec {
            host: format!("{name}.{}", self.domain),
            service: GatewayService {
                name: sink.service.clone(),
                namespace: sink.namespace.clone(),
                port: sink.port,
            },
            rules: vec![GatewayPath {
                path: RULE_PATH.to_string(),
                methods: RULE_METHODS.iter().map(|m| m.to_string()).collect(),
            }],
            owners: Vec::new(),
        }
    }

    /// Create or adopt the rule for `sink` in the owner's namespace and
    /// register `owner` on it. Returns the stored rule, ready or not.
    pub async fn ensure(
        &self,
        owner: &ResourceKey,
        sink: &ClusterLocalSink,
    ) -> Result<GatewayRule, BackendError> {
        let name = gateway_rule_name(sink);
        let key = ResourceKey::new(&owner.namespace, &name);
        let desired = self.desired_spec(&name, sink);

        match self.store.get(&key).await? {
            Some(mut rule) => {
                let mut changed = rule.add_owner(owner.clone());
                if rule.spec.host != desired.host
                    || rule.spec.service != desired.service
                    || rule.spec.rules != desired.rules
                {
                    rule.spec.host = desired.host;
                    rule.spec.service = desired.service;
                    rule.spec.rules = desired.rules;
                    changed = true;
                }
                if !changed {
                    return Ok(rule);
                }
                tracing::debug!(rule = %key, owner = %owner, "Updating gateway rule");
                Ok(self.store.update(&rule).await?)
            }
            None => {
                let mut rule = GatewayRule::new(&owner.namespace, &name, desired);
                rule.add_owner(owner.clone());
                tracing::info!(rule = %key, owner = %owner, "Creating gateway rule");
                Ok(self.store.create(&rule).await?)
            }
        }
    }

    /// Drop `owner` from the rule; delete the rule when nobody owns it.
    /// A missing rule is success.
    pub async fn release(&self, rule: &ResourceKey, owner: &ResourceKey) -> Result<(), BackendError> {
        let Some(mut current) = self.store.get(rule).await? else {
            return Ok(());
        };

        let removed = current.remove_owner(owner);
        if current.spec.owners.is_empty() {
            match self.store.delete(rule).await {
                Ok(()) => {
                    tracing::info!(rule = %rule, "Deleted gateway rule");
                    Ok(())
                }
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.into()),
            }
        } else if removed {
            self.store.update(&current).await?;
            tracing::debug!(rule = %rule, owner = %owner, "Released gateway rule");
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Delete the rule whatever its owners. Returns `false` if it was
    /// already gone.
    pub async fn purge(&self, rule: &ResourceKey) -> Result<bool, BackendError> {
        match self.store.delete(rule).await {
            Ok(()) => {
                tracing::info!(rule = %rule, "Purged gateway rule");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
