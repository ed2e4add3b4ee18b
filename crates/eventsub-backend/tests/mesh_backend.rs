//! Event mesh backend against a mocked management API and token endpoint.

use std::sync::Arc;

use eventsub_backend::mesh::gateway_rule_name;
use eventsub_backend::{
    Backend, BackendError, EventMeshBackend, EventMeshConfig, OAuth2Credentials, SideResource,
    parse_cluster_local_sink,
};
use eventsub_core::{
    ConditionType, EventTypeStatus, HashedNameMapper, ResourceKey, Subscription,
};
use eventsub_memory::InMemoryGatewayRuleStore;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SINK: &str = "http://orders.shop.svc.cluster.local:8080/hook";
const DOMAIN: &str = "cluster.example.com";
const MESH_NAMESPACE: &str = "/default/shop/1";

struct Harness {
    server: MockServer,
    rules: Arc<InMemoryGatewayRuleStore>,
    backend: EventMeshBackend,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let rules = Arc::new(InMemoryGatewayRuleStore::new());
        let backend = EventMeshBackend::new(
            EventMeshConfig {
                api_url: server.uri(),
                domain: DOMAIN.into(),
                namespace: MESH_NAMESPACE.into(),
                ..Default::default()
            },
            OAuth2Credentials::new("client", "secret", format!("{}/oauth/token", server.uri())),
            rules.clone(),
            Arc::new(HashedNameMapper::new(DOMAIN, 50, 40)),
        )
        .unwrap();
        backend.initialize().await.unwrap();

        Self {
            server,
            rules,
            backend,
        }
    }

    fn subscription_path(&self, sub: &Subscription) -> String {
        format!(
            "/events/subscriptions/{}",
            self.backend.mesh_subscription_name(sub)
        )
    }

    /// Body the API would return for `sub` as the backend wants it.
    fn remote(&self, sub: &Subscription, state: &str) -> Value {
        let rule = gateway_rule_name(&parse_cluster_local_sink(SINK).unwrap());
        let events: Vec<Value> = sub
            .status
            .types
            .iter()
            .map(|t| json!({ "source": MESH_NAMESPACE, "type": t.clean_type }))
            .collect();
        json!({
            "name": self.backend.mesh_subscription_name(sub),
            "events": events,
            "webhookUrl": format!("https://{rule}.{DOMAIN}/hook"),
            "qos": "AT_LEAST_ONCE",
            "contentMode": "structured",
            "exemptHandshake": true,
            "subscriptionStatus": state
        })
    }
}

fn orders(name: &str, types: &[&str]) -> Subscription {
    let mut sub = Subscription::new("shop", name, SINK, types.to_vec());
    sub.status.types = types
        .iter()
        .map(|t| EventTypeStatus {
            original_type: (*t).to_string(),
            clean_type: (*t).to_string(),
        })
        .collect();
    sub
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = EventMeshBackend::new(
        EventMeshConfig::default(),
        OAuth2Credentials::new("client", "secret", "https://auth.example.com/token"),
        Arc::new(InMemoryGatewayRuleStore::new()),
        Arc::new(HashedNameMapper::new(DOMAIN, 50, 40)),
    );
    assert!(matches!(result, Err(BackendError::Config(_))));
}

#[tokio::test]
async fn test_sync_creates_gateway_rule_and_mesh_subscription() {
    let h = Harness::start().await;
    let mut sub = orders("orders", &["order.created.v1"]);
    let sub_path = h.subscription_path(&sub);

    Mock::given(method("GET"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(h.remote(&sub, "Active")))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&h.server)
        .await;

    h.backend.sync_subscription(&mut sub).await.unwrap();

    let rule_name = sub.status.backend.gateway_rule_name.clone().unwrap();
    let rule = h.rules.snapshot(&ResourceKey::new("shop", &rule_name)).unwrap();
    assert!(rule.has_owner(&sub.key()));
    assert_eq!(rule.spec.service.port, 8080);

    assert_eq!(
        sub.status.backend.external_sink.as_deref(),
        Some(format!("https://{rule_name}.{DOMAIN}/hook").as_str())
    );
    assert_eq!(sub.status.backend.mesh_types[0].mesh_type, "order.created.v1");
    assert_eq!(sub.status.backend.mesh_subscription_status.as_deref(), Some("Active"));
    assert!(sub.status.condition(ConditionType::GatewayRuleReady).unwrap().is_true());
    assert!(sub.status.condition(ConditionType::SubscriptionActive).unwrap().is_true());
}

#[tokio::test]
async fn test_unready_gateway_rule_blocks_registration() {
    let h = Harness::start().await;
    h.rules.admit_new_rules_as(Some(false));
    Mock::given(method("POST"))
        .and(path("/events/subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&h.server)
        .await;

    let mut sub = orders("orders", &["order.created.v1"]);
    let err = h.backend.sync_subscription(&mut sub).await.unwrap_err();

    assert!(matches!(err, BackendError::GatewayRuleNotReady { .. }));
    assert!(err.is_retryable());
    assert!(!sub.status.condition(ConditionType::GatewayRuleReady).unwrap().is_true());
    assert!(sub.status.backend.gateway_rule_name.is_some());
}

#[tokio::test]
async fn test_changed_subscription_is_recreated() {
    let h = Harness::start().await;
    let mut sub = orders("orders", &["order.created.v1", "order.updated.v1"]);
    let sub_path = h.subscription_path(&sub);
    let outdated = h.remote(&orders("orders", &["order.created.v1"]), "Active");

    Mock::given(method("GET"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(outdated))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(h.remote(&sub, "Active")))
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&h.server)
        .await;

    h.backend.sync_subscription(&mut sub).await.unwrap();
    assert_eq!(sub.status.backend.mesh_types.len(), 2);
}

#[tokio::test]
async fn test_paused_subscription_is_resumed() {
    let h = Harness::start().await;
    let mut sub = orders("orders", &["order.created.v1"]);
    let sub_path = h.subscription_path(&sub);

    Mock::given(method("GET"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(h.remote(&sub, "Paused")))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{sub_path}/state")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.backend.sync_subscription(&mut sub).await.unwrap();
    assert_eq!(sub.status.backend.mesh_subscription_status.as_deref(), Some("Active"));
    assert!(sub.status.condition(ConditionType::SubscriptionActive).unwrap().is_true());
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_once() {
    let h = Harness::start().await;
    let sub = orders("orders", &["order.created.v1"]);
    let sub_path = h.subscription_path(&sub);

    Mock::given(method("DELETE"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(sub_path.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.server)
        .await;

    h.backend.delete_subscription(&sub).await.unwrap();
}

#[tokio::test]
async fn test_delete_of_missing_subscription_succeeds() {
    let h = Harness::start().await;
    let sub = orders("orders", &["order.created.v1"]);
    Mock::given(method("DELETE"))
        .and(path(h.subscription_path(&sub).as_str()))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    h.backend.delete_subscription(&sub).await.unwrap();
    h.backend.delete_subscription(&sub).await.unwrap();
}

#[tokio::test]
async fn test_delete_surfaces_server_errors() {
    let h = Harness::start().await;
    let sub = orders("orders", &["order.created.v1"]);
    Mock::given(method("DELETE"))
        .and(path(h.subscription_path(&sub).as_str()))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&h.server)
        .await;

    let err = h.backend.delete_subscription(&sub).await.unwrap_err();
    assert!(matches!(err, BackendError::Http { status: 500, .. }));
}

#[tokio::test]
async fn test_shared_gateway_rule_is_released_by_last_owner() {
    let h = Harness::start().await;
    let mut first = orders("first", &["order.created.v1"]);
    let mut second = orders("second", &["order.created.v1"]);

    for sub in [&first, &second] {
        Mock::given(method("GET"))
            .and(path(h.subscription_path(sub).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(h.remote(sub, "Active")))
            .mount(&h.server)
            .await;
    }
    h.backend.sync_subscription(&mut first).await.unwrap();
    h.backend.sync_subscription(&mut second).await.unwrap();
    assert_eq!(h.rules.len(), 1);

    let resources = h.backend.side_resources(&first);
    assert_eq!(resources.len(), 1);
    let SideResource::GatewayRule { rule, .. } = &resources[0];
    let rule = rule.clone();

    h.backend.delete_side_resource(&resources[0]).await.unwrap();
    let remaining = h.rules.snapshot(&rule).unwrap();
    assert!(!remaining.has_owner(&first.key()));
    assert!(remaining.has_owner(&second.key()));

    for resource in h.backend.side_resources(&second) {
        h.backend.delete_side_resource(&resource).await.unwrap();
    }
    assert!(h.rules.is_empty());

    // Releasing again is a no-op.
    h.backend.delete_side_resource(&resources[0]).await.unwrap();
}

#[tokio::test]
async fn test_purge_deletes_shared_gateway_rule() {
    let h = Harness::start().await;
    let mut first = orders("first", &["order.created.v1"]);
    let mut second = orders("second", &["order.created.v1"]);

    for sub in [&first, &second] {
        Mock::given(method("GET"))
            .and(path(h.subscription_path(sub).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(h.remote(sub, "Active")))
            .mount(&h.server)
            .await;
    }
    h.backend.sync_subscription(&mut first).await.unwrap();
    h.backend.sync_subscription(&mut second).await.unwrap();

    let resources = h.backend.side_resources(&first);
    assert!(h.backend.purge_side_resource(&resources[0]).await.unwrap());
    assert!(h.rules.is_empty());

    assert!(!h.backend.purge_side_resource(&resources[0]).await.unwrap());
}
