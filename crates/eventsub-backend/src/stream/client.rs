//! Stream broker client interface.
//!
//! The wire protocol lives behind this trait. The backend only speaks in
//! terms of stream and consumer settings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::config::{DeliverPolicy, DiscardPolicy, RetentionPolicy, StorageType, StreamConfig};
use crate::error::BackendError;

/// Stream settings as stored on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub name: String,
    pub subjects: Vec<String>,
    pub storage: StorageType,
    pub retention: RetentionPolicy,
    pub discard: DiscardPolicy,
    pub max_messages: i64,
    pub max_bytes: i64,
    pub replicas: usize,
}

impl From<&StreamConfig> for StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            name: config.stream_name.clone(),
            subjects: config.stream_subjects(),
            storage: config.storage,
            retention: config.retention,
            discard: config.discard,
            max_messages: config.max_messages,
            max_bytes: config.max_bytes,
            replicas: config.replicas,
        }
    }
}

/// Durable consumer settings as stored on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Durable name
    pub name: String,
    /// Sorted, deduplicated
    pub filter_subjects: Vec<String>,
    pub deliver_policy: DeliverPolicy,
    pub max_ack_pending: u32,
    pub ack_wait: Duration,
    /// Where the dispatcher pushes matching messages
    pub sink: String,
}

#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError>;

    fn is_connected(&self) -> bool;

    /// Returns `None` if the stream does not exist.
    async fn stream_info(&self, name: &str) -> Result<Option<StreamSettings>, BackendError>;

    async fn add_stream(&self, settings: &StreamSettings) -> Result<(), BackendError>;

    async fn update_stream(&self, settings: &StreamSettings) -> Result<(), BackendError>;

    /// Returns `None` if the consumer does not exist.
    async fn consumer_info(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Option<ConsumerSettings>, BackendError>;

    async fn add_consumer(&self, stream: &str, consumer: &ConsumerSettings) -> Result<(), BackendError>;

    async fn update_consumer(
        &self,
        stream: &str,
        consumer: &ConsumerSettings,
    ) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the consumer does not exist.
    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BackendError>;

    /// Durable names of every consumer on the stream.
    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BackendError>;
}

pub type DynStreamClient = Arc<dyn StreamClient>;
