//! Event mesh management API payloads.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Qos {
    #[default]
    AtLeastOnce,
    AtMostOnce,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    #[default]
    Structured,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshSubscriptionState {
    Active,
    Paused,
}

impl fmt::Display for MeshSubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("Active"),
            Self::Paused => f.write_str("Paused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshEvent {
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuth {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshSubscription {
    pub name: String,
    pub events: Vec<MeshEvent>,
    pub webhook_url: String,

    /// Never returned by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_auth: Option<WebhookAuth>,

    pub qos: Qos,
    #[serde(default)]
    pub content_mode: ContentMode,
    #[serde(default)]
    pub exempt_handshake: bool,

    #[serde(default, skip_serializing)]
    pub subscription_status: Option<MeshSubscriptionState>,

    #[serde(default, skip_serializing)]
    pub subscription_status_reason: Option<String>,
}

impl MeshSubscription {
    /// Whether `other` delivers the same events to the same place the
    /// same way. Credentials and state are not compared.
    pub fn matches(&self, other: &MeshSubscription) -> bool {
        let events: BTreeSet<&MeshEvent> = self.events.iter().collect();
        let other_events: BTreeSet<&MeshEvent> = other.events.iter().collect();
        events == other_events
            && self.webhook_url == other.webhook_url
            && self.qos == other.qos
            && self.content_mode == other.content_mode
            && self.exempt_handshake == other.exempt_handshake
    }

    pub fn is_paused(&self) -> bool {
        self.subscription_status == Some(MeshSubscriptionState::Paused)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StateChange {
    pub action: StateAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum StateAction {
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(events: &[&str]) -> MeshSubscription {
        MeshSubscription {
            name: "orders".into(),
            events: events
                .iter()
                .map(|t| MeshEvent {
                    source: "/default/ns".into(),
                    event_type: (*t).into(),
                })
                .collect(),
            webhook_url: "https://webhook-1.example.com/".into(),
            webhook_auth: None,
            qos: Qos::AtLeastOnce,
            content_mode: ContentMode::Structured,
            exempt_handshake: true,
            subscription_status: None,
            subscription_status_reason: None,
        }
    }

    #[test]
    fn test_matches_ignores_event_order_and_state() {
        let a = subscription(&["p.a.v1", "p.b.v1"]);
        let mut b = subscription(&["p.b.v1", "p.a.v1"]);
        b.subscription_status = Some(MeshSubscriptionState::Paused);
        assert!(a.matches(&b));
        assert!(!a.matches(&subscription(&["p.a.v1"])));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(subscription(&["p.a.v1"])).unwrap();
        assert_eq!(json["qos"], "AT_LEAST_ONCE");
        assert_eq!(json["webhookUrl"], "https://webhook-1.example.com/");
        assert_eq!(json["events"][0]["type"], "p.a.v1");
        assert!(json.get("subscriptionStatus").is_none());

        let parsed: MeshSubscription = serde_json::from_value(serde_json::json!({
            "name": "orders",
            "events": [{"source": "/default/ns", "type": "p.a.v1"}],
            "webhookUrl": "https://webhook-1.example.com/",
            "qos": "AT_LEAST_ONCE",
            "subscriptionStatus": "Paused"
        }))
        .unwrap();
        assert!(parsed.is_paused());
    }
}
