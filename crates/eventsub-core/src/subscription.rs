//! Subscription resource model.
//!
//! A [`Subscription`] is the declarative record a user creates to receive
//! events: a sink URL, a set of raw event types and optional delivery
//! overrides. The status half is owned by the controller and always mirrors
//! the outcome of the most recent reconciliation attempt.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Finalizer guarding backend teardown before a Subscription disappears.
pub const SUBSCRIPTION_FINALIZER: &str = "eventing.eventsub.io/subscription-finalizer";

/// Max in-flight messages used when neither the Subscription nor the
/// manager defaults override it.
pub const DEFAULT_MAX_IN_FLIGHT_MESSAGES: u32 = 10;

/// Condition reasons written by the controller.
pub mod reasons {
    pub const SYNCED: &str = "SubscriptionSynced";
    pub const SYNC_FAILED: &str = "SyncFailed";
    pub const CONVERSION_FAILED: &str = "ConversionFailed";
    pub const SINK_VALID: &str = "SinkValid";
    pub const SINK_INVALID: &str = "SinkInvalid";
    pub const DELETE_FAILED: &str = "DeleteFailed";
    pub const DELETED: &str = "SubscriptionDeleted";
    pub const BACKEND_STOPPED: &str = "BackendStopped";
    pub const GATEWAY_RULE_READY: &str = "GatewayRuleReady";
    pub const GATEWAY_RULE_NOT_READY: &str = "GatewayRuleNotReady";
    pub const SUBSCRIPTION_ACTIVE: &str = "SubscriptionActive";
    pub const SUBSCRIPTION_NOT_ACTIVE: &str = "SubscriptionNotActive";
}

/// Namespaced identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata shared by every stored resource kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,

    #[serde(default)]
    pub uid: String,

    /// Incremented by the store on every spec change
    #[serde(default)]
    pub generation: i64,

    /// Opaque optimistic-concurrency token owned by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deletion_timestamp: Option<OffsetDateTime>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: 1,
            ..Default::default()
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.namespace, &self.name)
    }
}

/// How raw event types are turned into backend subjects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeMatching {
    /// Raw types are cleaned and prefixed.
    #[default]
    Standard,
    /// Raw types are used verbatim.
    Exact,
}

/// Per-subscription delivery overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight_messages: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Where matching events are delivered
    pub sink: String,

    /// Raw event types as written by the user
    #[serde(default)]
    pub types: Vec<String>,

    /// Event source; the mesh backend uses it as the event source attribute
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(default)]
    pub type_matching: TypeMatching,

    #[serde(default)]
    pub config: DeliveryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    SubscriptionActive,
    GatewayRuleReady,
    SinkValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<OffsetDateTime>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: impl Into<ConditionStatus>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Equality ignoring the transition timestamp.
    fn same_state(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Cleaned form of one raw event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeStatus {
    pub original_type: String,
    pub clean_type: String,
}

/// Event type as registered on the event mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshTypeStatus {
    pub original_type: String,
    pub mesh_type: String,
}

/// Backend correlation fields. Empty means "never synced".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_subjects: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_rule_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_sink: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_subscription_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mesh_types: Vec<MeshTypeStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_subscription_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<EventTypeStatus>,

    #[serde(default)]
    pub backend: BackendStatus,
}

impl SubscriptionStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Insert or replace a condition.
    ///
    /// The transition time is carried over when the status did not flip.
    /// Returns `true` when anything other than the timestamp changed.
    pub fn set_condition(&mut self, mut condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.same_state(&condition) {
                    return false;
                }
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    Some(OffsetDateTime::now_utc())
                };
                *existing = condition;
                true
            }
            None => {
                condition.last_transition_time = Some(OffsetDateTime::now_utc());
                self.conditions.push(condition);
                true
            }
        }
    }

    pub fn remove_condition(&mut self, condition_type: ConditionType) {
        self.conditions.retain(|c| c.condition_type != condition_type);
    }

    /// Record a successful reconciliation of `generation`.
    pub fn mark_ready(&mut self, generation: i64) {
        self.ready = true;
        self.observed_generation = Some(generation);
        self.set_condition(Condition::new(
            ConditionType::Ready,
            true,
            reasons::SYNCED,
            "",
        ));
    }

    /// Record a failed attempt. The observed generation still advances so
    /// the status never reads as a stale success.
    pub fn mark_not_ready(
        &mut self,
        generation: i64,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.ready = false;
        self.observed_generation = Some(generation);
        self.set_condition(Condition::new(
            ConditionType::Ready,
            false,
            reason,
            message,
        ));
    }

    /// Message of the Ready condition, if any.
    pub fn ready_message(&self) -> Option<&str> {
        self.condition(ConditionType::Ready)
            .map(|c| c.message.as_str())
            .filter(|m| !m.is_empty())
    }
}

/// Declarative event subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub metadata: ObjectMeta,
    pub spec: SubscriptionSpec,
    #[serde(default)]
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        sink: impl Into<String>,
        types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: SubscriptionSpec {
                sink: sink.into(),
                types: types.into_iter().map(Into::into).collect(),
                ..Default::default()
            },
            status: SubscriptionStatus::default(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.metadata.key()
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Raw types with duplicates removed, first occurrence wins.
    pub fn unique_types(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.spec
            .types
            .iter()
            .map(String::as_str)
            .filter(|t| seen.insert(*t))
            .collect()
    }

    pub fn max_in_flight(&self, default: u32) -> u32 {
        self.spec.config.max_in_flight_messages.unwrap_or(default)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .iter()
            .any(|f| f == SUBSCRIPTION_FINALIZER)
    }

    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.metadata
                .finalizers
                .push(SUBSCRIPTION_FINALIZER.to_string());
        }
    }

    pub fn remove_finalizer(&mut self) {
        self.metadata
            .finalizers
            .retain(|f| f != SUBSCRIPTION_FINALIZER);
    }

    /// Copy of this Subscription with its status reset to the
    /// never-reconciled state. Pure: no I/O.
    pub fn with_status_defaults(&self) -> Subscription {
        Subscription {
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status: SubscriptionStatus::default(),
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.spec.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.spec.config.max_in_flight_messages = Some(max_in_flight);
        self
    }

    pub fn with_type_matching(mut self, type_matching: TypeMatching) -> Self {
        self.spec.type_matching = type_matching;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.spec.source = source.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Subscription {
        Subscription::new(
            "shop",
            "orders-v1",
            "https://svc.shop.svc.cluster.local",
            ["order.created.v1"],
        )
    }

    #[test]
    fn test_status_reset_is_pure() {
        let mut sub = orders();
        sub.add_finalizer();
        sub.status.mark_ready(3);
        sub.status.backend.consumer_name = Some("orders-v1abc".into());
        sub.status.backend.gateway_rule_name = Some("webhook-123".into());
        let before = sub.clone();

        let reset = sub.with_status_defaults();

        assert_eq!(sub, before);
        assert_eq!(reset.status, SubscriptionStatus::default());
        assert!(!reset.status.ready);
        assert!(reset.status.backend.gateway_rule_name.is_none());
        assert_eq!(reset.metadata, sub.metadata);
        assert_eq!(reset.spec, sub.spec);
    }

    #[test]
    fn test_unique_types_keeps_first_occurrence() {
        let sub = orders().with_types(["b", "a", "b", "c", "a"]);
        assert_eq!(sub.unique_types(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_finalizer_roundtrip() {
        let mut sub = orders();
        assert!(!sub.has_finalizer());
        sub.add_finalizer();
        sub.add_finalizer();
        assert_eq!(sub.metadata.finalizers.len(), 1);
        sub.remove_finalizer();
        assert!(!sub.has_finalizer());
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut status = SubscriptionStatus::default();
        assert!(status.set_condition(Condition::new(
            ConditionType::Ready,
            false,
            reasons::SYNC_FAILED,
            "broker unreachable",
        )));
        let first = status
            .condition(ConditionType::Ready)
            .and_then(|c| c.last_transition_time);

        assert!(status.set_condition(Condition::new(
            ConditionType::Ready,
            false,
            reasons::SYNC_FAILED,
            "broker still unreachable",
        )));
        let second = status
            .condition(ConditionType::Ready)
            .and_then(|c| c.last_transition_time);
        assert_eq!(first, second);

        assert!(!status.set_condition(Condition::new(
            ConditionType::Ready,
            false,
            reasons::SYNC_FAILED,
            "broker still unreachable",
        )));
    }

    #[test]
    fn test_failed_attempt_replaces_success() {
        let mut status = SubscriptionStatus::default();
        status.mark_ready(1);
        assert!(status.ready);

        status.mark_not_ready(2, reasons::SYNC_FAILED, "boom");
        assert!(!status.ready);
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(status.ready_message(), Some("boom"));
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_serde_camel_case() {
        let mut sub = orders().with_max_in_flight(5);
        sub.status.types.push(EventTypeStatus {
            original_type: "order.created.v1".into(),
            clean_type: "order.created.v1".into(),
        });
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["spec"]["config"]["maxInFlightMessages"], 5);
        assert_eq!(json["spec"]["typeMatching"], "standard");
        assert_eq!(json["status"]["types"][0]["cleanType"], "order.created.v1");

        let back: Subscription = serde_json::from_value(json).unwrap();
        assert_eq!(back, sub);
    }
}
