//! Cloud event mesh backend.
//!
//! The mesh pushes events to a webhook, so every Subscription needs its
//! sink exposed through a gateway rule before the mesh-side subscription
//! is registered. Management calls are authorized with OAuth2 client
//! credentials.

pub mod client;
pub mod config;
pub mod gateway;
pub mod oauth;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eventsub_core::subscription::reasons;
use eventsub_core::{
    Condition, ConditionType, DynGatewayRuleStore, MeshTypeStatus, NameMapper, ResourceKey,
    Subscription,
};

pub use client::MeshClient;
pub use config::EventMeshConfig;
pub use gateway::{GatewayRules, gateway_rule_name};
pub use oauth::{ClientCredentialsTokenSource, OAuth2Credentials};
pub use types::{ContentMode, MeshEvent, MeshSubscription, MeshSubscriptionState, Qos, WebhookAuth};

use crate::backend::{Backend, BackendKind, SideResource, SubjectLimits, join_subject};
use crate::error::BackendError;
use crate::sink::parse_cluster_local_sink;

pub const MAX_EVENT_TYPE_LENGTH: usize = 255;
pub const MAX_EVENT_TYPE_SEGMENTS: usize = 7;

/// Mesh subscription name length bound and hash share.
pub const MAX_SUBSCRIPTION_NAME_LENGTH: usize = 50;
pub const SUBSCRIPTION_NAME_HASH_LENGTH: usize = 40;

pub struct EventMeshBackend {
    config: EventMeshConfig,
    tokens: Arc<ClientCredentialsTokenSource>,
    client: MeshClient,
    gateway: GatewayRules,
    mapper: Arc<dyn NameMapper>,
    initialized: AtomicBool,
}

impl EventMeshBackend {
    pub fn new(
        config: EventMeshConfig,
        credentials: OAuth2Credentials,
        gateway_store: DynGatewayRuleStore,
        mapper: Arc<dyn NameMapper>,
    ) -> Result<Self, BackendError> {
        config.validate().map_err(BackendError::Config)?;
        credentials.validate().map_err(BackendError::Config)?;

        let tokens = Arc::new(ClientCredentialsTokenSource::new(
            credentials,
            config.request_timeout,
            config.token_refresh_margin,
        )?);
        let client = MeshClient::new(&config.api_url, config.request_timeout, tokens.clone())?;
        let gateway = GatewayRules::new(gateway_store, config.domain.clone());

        Ok(Self {
            config,
            tokens,
            client,
            gateway,
            mapper,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EventMeshConfig {
        &self.config
    }

    pub fn client(&self) -> &MeshClient {
        &self.client
    }

    pub fn mesh_subscription_name(&self, subscription: &Subscription) -> String {
        self.mapper
            .map_subscription_name(subscription.name(), subscription.namespace())
    }

    fn ensure_initialized(&self) -> Result<(), BackendError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::NotInitialized)
        }
    }

    fn desired_subscription(
        &self,
        subscription: &Subscription,
        name: &str,
        webhook_url: &str,
    ) -> MeshSubscription {
        let events: BTreeSet<MeshEvent> = subscription
            .status
            .types
            .iter()
            .map(|t| MeshEvent {
                source: self.config.namespace.clone(),
                event_type: self.qualified_subject(&t.clean_type),
            })
            .collect();
        let credentials = self.tokens.credentials();

        MeshSubscription {
            name: name.to_string(),
            events: events.into_iter().collect(),
            webhook_url: webhook_url.to_string(),
            webhook_auth: Some(WebhookAuth {
                auth_type: "oauth2".to_string(),
                grant_type: "client_credentials".to_string(),
                client_id: credentials.client_id.clone(),
                client_secret: credentials.client_secret.clone(),
                token_url: credentials.token_url.clone(),
            }),
            qos: self.config.qos,
            content_mode: self.config.content_mode,
            exempt_handshake: self.config.exempt_handshake,
            subscription_status: None,
            subscription_status_reason: None,
        }
    }

    /// Converge the mesh-side subscription onto `desired`. A changed
    /// subscription is deleted and recreated so its event set is replaced.
    async fn converge(&self, desired: &MeshSubscription) -> Result<MeshSubscription, BackendError> {
        let name = &desired.name;
        let mut current = self.client.get(name).await?;

        if let Some(existing) = &current
            && !existing.matches(desired)
        {
            tracing::info!(subscription = %name, "Event mesh subscription changed, recreating");
            self.client.delete(name).await?;
            current = None;
        }

        let mut current = match current {
            Some(existing) => existing,
            None => {
                self.client.create(desired).await?;
                tracing::info!(
                    subscription = %name,
                    events = desired.events.len(),
                    "Created event mesh subscription"
                );
                self.client
                    .get(name)
                    .await?
                    .ok_or_else(|| BackendError::not_found(format!("event mesh subscription {name}")))?
            }
        };

        if current.is_paused() {
            self.client.resume(name).await?;
            tracing::info!(subscription = %name, "Resumed event mesh subscription");
            current.subscription_status = Some(MeshSubscriptionState::Active);
        }
        Ok(current)
    }
}

#[async_trait]
impl Backend for EventMeshBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EventMesh
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(BackendError::AlreadyInitialized);
        }
        self.tokens.token().await?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(api_url = %self.config.api_url, "Event mesh backend initialized");
        Ok(())
    }

    async fn sync_subscription(&self, subscription: &mut Subscription) -> Result<(), BackendError> {
        self.ensure_initialized()?;

        let sink = parse_cluster_local_sink(&subscription.spec.sink)?;
        let owner = subscription.key();
        let rule = self.gateway.ensure(&owner, &sink).await?;
        let rule_name = rule.metadata.name.clone();

        if let Some(previous) = subscription.status.backend.gateway_rule_name.clone()
            && previous != rule_name
        {
            self.gateway
                .release(&ResourceKey::new(subscription.namespace(), previous), &owner)
                .await?;
        }
        subscription.status.backend.gateway_rule_name = Some(rule_name.clone());

        if !rule.is_ready() {
            subscription.status.set_condition(Condition::new(
                ConditionType::GatewayRuleReady,
                false,
                reasons::GATEWAY_RULE_NOT_READY,
                format!("gateway rule {rule_name} is not ready"),
            ));
            return Err(BackendError::GatewayRuleNotReady { name: rule_name });
        }
        subscription.status.set_condition(Condition::new(
            ConditionType::GatewayRuleReady,
            true,
            reasons::GATEWAY_RULE_READY,
            "",
        ));

        let external_sink = rule.external_url(&sink.path);
        let name = self.mesh_subscription_name(subscription);
        let desired = self.desired_subscription(subscription, &name, &external_sink);
        let current = self.converge(&desired).await?;

        let mesh_types = subscription
            .status
            .types
            .iter()
            .map(|t| MeshTypeStatus {
                original_type: t.original_type.clone(),
                mesh_type: self.qualified_subject(&t.clean_type),
            })
            .collect();
        let backend = &mut subscription.status.backend;
        backend.external_sink = Some(external_sink);
        backend.mesh_subscription_name = Some(name);
        backend.mesh_subscription_status = current.subscription_status.map(|s| s.to_string());
        backend.mesh_types = mesh_types;

        let active = !current.is_paused();
        subscription.status.set_condition(Condition::new(
            ConditionType::SubscriptionActive,
            active,
            if active {
                reasons::SUBSCRIPTION_ACTIVE
            } else {
                reasons::SUBSCRIPTION_NOT_ACTIVE
            },
            current.subscription_status_reason.unwrap_or_default(),
        ));
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &Subscription) -> Result<(), BackendError> {
        self.ensure_initialized()?;

        let mut names = vec![self.mesh_subscription_name(subscription)];
        if let Some(recorded) = &subscription.status.backend.mesh_subscription_name
            && !names.contains(recorded)
        {
            names.push(recorded.clone());
        }
        for name in names {
            self.client.delete(&name).await?;
            tracing::info!(
                namespace = %subscription.namespace(),
                name = %subscription.name(),
                subscription = %name,
                "Deleted event mesh subscription"
            );
        }
        Ok(())
    }

    fn qualified_subject(&self, clean_type: &str) -> String {
        join_subject(&self.config.event_type_prefix, clean_type)
    }

    fn subject_limits(&self) -> SubjectLimits {
        SubjectLimits {
            max_len: MAX_EVENT_TYPE_LENGTH,
            max_segments: Some(MAX_EVENT_TYPE_SEGMENTS),
        }
    }

    fn side_resources(&self, subscription: &Subscription) -> Vec<SideResource> {
        subscription
            .status
            .backend
            .gateway_rule_name
            .as_ref()
            .map(|rule| SideResource::GatewayRule {
                rule: ResourceKey::new(subscription.namespace(), rule),
                owner: subscription.key(),
            })
            .into_iter()
            .collect()
    }

    async fn delete_side_resource(&self, resource: &SideResource) -> Result<(), BackendError> {
        match resource {
            SideResource::GatewayRule { rule, owner } => self.gateway.release(rule, owner).await,
        }
    }

    async fn purge_side_resource(&self, resource: &SideResource) -> Result<bool, BackendError> {
        match resource {
            SideResource::GatewayRule { rule, .. } => self.gateway.purge(rule).await,
        }
    }
}
