//! Stream broker backend.
//!
//! Every Subscription maps to exactly one durable consumer on a shared
//! stream. The consumer's filter subjects are replaced wholesale on every
//! sync, so stale filters disappear and repeated syncs are no-ops.

pub mod client;
pub mod config;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eventsub_core::subscription::reasons;
use eventsub_core::{Condition, ConditionType, NameMapper, Subscription};

pub use client::{ConsumerSettings, DynStreamClient, StreamClient, StreamSettings};
pub use config::{DeliverPolicy, DiscardPolicy, RetentionPolicy, StorageType, StreamConfig};

use crate::backend::{Backend, BackendKind, SubjectLimits, join_subject};
use crate::error::BackendError;

/// Longest subject the broker accepts.
pub const MAX_SUBJECT_LENGTH: usize = 255;

/// Consumer name length bound and hash share.
pub const MAX_CONSUMER_NAME_LENGTH: usize = 48;
pub const CONSUMER_NAME_HASH_LENGTH: usize = 24;

pub struct StreamBackend {
    config: StreamConfig,
    client: DynStreamClient,
    mapper: Arc<dyn NameMapper>,
    initialized: AtomicBool,
}

impl StreamBackend {
    pub fn new(config: StreamConfig, client: DynStreamClient, mapper: Arc<dyn NameMapper>) -> Self {
        Self {
            config,
            client,
            mapper,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn consumer_name(&self, subscription: &Subscription) -> String {
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

    async fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.client.is_connected() {
            return Ok(());
        }
        tracing::info!(url = %self.config.url, "Reconnecting to stream broker");
        self.client.connect().await
    }

    async fn ensure_stream(&self) -> Result<(), BackendError> {
        let desired = StreamSettings::from(&self.config);
        match self.client.stream_info(&desired.name).await? {
            None => {
                tracing::info!(stream = %desired.name, "Creating stream");
                self.client.add_stream(&desired).await
            }
            Some(existing) if existing != desired => {
                tracing::info!(stream = %desired.name, "Updating stream configuration");
                self.client.update_stream(&desired).await
            }
            Some(_) => {
                tracing::debug!(stream = %desired.name, "Stream configuration up to date");
                Ok(())
            }
        }
    }

    fn desired_consumer(&self, subscription: &Subscription, name: String) -> ConsumerSettings {
        let filter_subjects: BTreeSet<String> = subscription
            .status
            .types
            .iter()
            .map(|t| self.qualified_subject(&t.clean_type))
            .collect();
        ConsumerSettings {
            name,
            filter_subjects: filter_subjects.into_iter().collect(),
            deliver_policy: self.config.deliver_policy,
            max_ack_pending: subscription.max_in_flight(self.config.max_in_flight),
            ack_wait: self.config.ack_wait,
            sink: subscription.spec.sink.clone(),
        }
    }

    async fn delete_consumer_if_present(&self, name: &str) -> Result<bool, BackendError> {
        match self.client.delete_consumer(&self.config.stream_name, name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete consumers on the stream that no Subscription maps to.
    ///
    /// Returns the number of consumers removed.
    pub async fn delete_orphaned_consumers(
        &self,
        subscriptions: &[Subscription],
    ) -> Result<usize, BackendError> {
        self.ensure_initialized()?;
        self.ensure_connected().await?;

        let expected: HashSet<String> = subscriptions
            .iter()
            .map(|s| self.consumer_name(s))
            .collect();
        let existing = self.client.list_consumers(&self.config.stream_name).await?;

        let mut deleted = 0;
        for name in existing.iter().filter(|n| !expected.contains(*n)) {
            if self.delete_consumer_if_present(name).await? {
                tracing::info!(consumer = %name, "Deleted orphaned consumer");
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl Backend for StreamBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Stream
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(BackendError::AlreadyInitialized);
        }
        self.client.connect().await?;
        self.ensure_stream().await?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            stream = %self.config.stream_name,
            url = %self.config.url,
            "Stream backend initialized"
        );
        Ok(())
    }

    async fn sync_subscription(&self, subscription: &mut Subscription) -> Result<(), BackendError> {
        self.ensure_initialized()?;
        self.ensure_connected().await?;

        let stream = &self.config.stream_name;
        let name = self.consumer_name(subscription);
        let desired = self.desired_consumer(subscription, name.clone());

        match self.client.consumer_info(stream, &name).await? {
            None => {
                self.client.add_consumer(stream, &desired).await?;
                tracing::info!(
                    namespace = %subscription.namespace(),
                    name = %subscription.name(),
                    consumer = %name,
                    filters = desired.filter_subjects.len(),
                    "Created consumer"
                );
            }
            Some(existing) if existing != desired => {
                let current: HashSet<&String> = existing.filter_subjects.iter().collect();
                let wanted: HashSet<&String> = desired.filter_subjects.iter().collect();
                self.client.update_consumer(stream, &desired).await?;
                tracing::info!(
                    namespace = %subscription.namespace(),
                    name = %subscription.name(),
                    consumer = %name,
                    added = wanted.difference(&current).count(),
                    removed = current.difference(&wanted).count(),
                    "Updated consumer"
                );
            }
            Some(_) => {
                tracing::debug!(consumer = %name, "Consumer up to date");
            }
        }

        // A consumer recorded under another name would be a second consumer.
        if let Some(previous) = subscription.status.backend.consumer_name.as_deref()
            && previous != name
            && self.delete_consumer_if_present(previous).await?
        {
            tracing::info!(consumer = %previous, "Deleted superseded consumer");
        }

        subscription.status.backend.consumer_name = Some(name);
        subscription.status.backend.filter_subjects = desired.filter_subjects;
        subscription.status.set_condition(Condition::new(
            ConditionType::SubscriptionActive,
            true,
            reasons::SUBSCRIPTION_ACTIVE,
            "",
        ));
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &Subscription) -> Result<(), BackendError> {
        self.ensure_initialized()?;
        self.ensure_connected().await?;

        let mut names = vec![self.consumer_name(subscription)];
        if let Some(recorded) = &subscription.status.backend.consumer_name
            && !names.contains(recorded)
        {
            names.push(recorded.clone());
        }

        for name in names {
            if self.delete_consumer_if_present(&name).await? {
                tracing::info!(
                    namespace = %subscription.namespace(),
                    name = %subscription.name(),
                    consumer = %name,
                    "Deleted consumer"
                );
            }
        }
        Ok(())
    }

    fn qualified_subject(&self, clean_type: &str) -> String {
        join_subject(&self.config.subject_prefix, clean_type)
    }

    fn subject_limits(&self) -> SubjectLimits {
        SubjectLimits {
            max_len: MAX_SUBJECT_LENGTH,
            max_segments: None,
        }
    }
}
