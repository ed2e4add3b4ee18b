//! In-memory stream broker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use eventsub_backend::BackendError;
use eventsub_backend::stream::{ConsumerSettings, StreamClient, StreamSettings};

type ConsumerKey = (String, String);

#[derive(Debug, Default)]
pub struct InMemoryStreamBroker {
    connected: AtomicBool,
    refuse_connections: AtomicBool,
    connects: AtomicUsize,
    streams: DashMap<String, StreamSettings>,
    consumers: DashMap<ConsumerKey, ConsumerSettings>,
    fail_deletes: DashSet<String>,
    fail_syncs: AtomicBool,
}

impl InMemoryStreamBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::connection("not connected"))
        }
    }

    fn consumer_key(stream: &str, consumer: &str) -> ConsumerKey {
        (stream.to_string(), consumer.to_string())
    }

    /// Simulate a dropped connection.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make consumer create/update calls fail as if the broker were down.
    pub fn fail_consumer_writes(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes_for(&self, consumer: impl Into<String>) {
        self.fail_deletes.insert(consumer.into());
    }

    pub fn stream(&self, name: &str) -> Option<StreamSettings> {
        self.streams.get(name).map(|s| s.value().clone())
    }

    pub fn consumer(&self, stream: &str, name: &str) -> Option<ConsumerSettings> {
        self.consumers
            .get(&Self::consumer_key(stream, name))
            .map(|c| c.value().clone())
    }

    /// Consumers on `stream`, sorted by name.
    pub fn consumers(&self, stream: &str) -> Vec<ConsumerSettings> {
        let mut consumers: Vec<ConsumerSettings> = self
            .consumers
            .iter()
            .filter(|e| e.key().0 == stream)
            .map(|e| e.value().clone())
            .collect();
        consumers.sort_by(|a, b| a.name.cmp(&b.name));
        consumers
    }

    /// Seed a stream directly, bypassing the client interface.
    pub fn seed_stream(&self, settings: StreamSettings) {
        self.streams.insert(settings.name.clone(), settings);
    }

    /// Seed a consumer directly, bypassing the client interface.
    pub fn seed_consumer(&self, stream: &str, consumer: ConsumerSettings) {
        self.consumers
            .insert(Self::consumer_key(stream, &consumer.name), consumer);
    }
}

#[async_trait]
impl StreamClient for InMemoryStreamBroker {
    async fn connect(&self) -> Result<(), BackendError> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(BackendError::connection("connection refused"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn stream_info(&self, name: &str) -> Result<Option<StreamSettings>, BackendError> {
        self.ensure_connected()?;
        Ok(self.stream(name))
    }

    async fn add_stream(&self, settings: &StreamSettings) -> Result<(), BackendError> {
        self.ensure_connected()?;
        match self.streams.entry(settings.name.clone()) {
            Entry::Occupied(_) => Err(BackendError::broker(format!(
                "stream {} already exists",
                settings.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(settings.clone());
                Ok(())
            }
        }
    }

    async fn update_stream(&self, settings: &StreamSettings) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let mut stream = self
            .streams
            .get_mut(&settings.name)
            .ok_or_else(|| BackendError::not_found(format!("stream {}", settings.name)))?;
        *stream = settings.clone();
        Ok(())
    }

    async fn consumer_info(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Option<ConsumerSettings>, BackendError> {
        self.ensure_connected()?;
        Ok(self.consumer(stream, consumer))
    }

    async fn add_consumer(&self, stream: &str, consumer: &ConsumerSettings) -> Result<(), BackendError> {
        self.ensure_connected()?;
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(BackendError::broker("injected consumer write failure"));
        }
        if !self.streams.contains_key(stream) {
            return Err(BackendError::not_found(format!("stream {stream}")));
        }
        match self.consumers.entry(Self::consumer_key(stream, &consumer.name)) {
            Entry::Occupied(_) => Err(BackendError::broker(format!(
                "consumer {} already exists",
                consumer.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(consumer.clone());
                Ok(())
            }
        }
    }

    async fn update_consumer(
        &self,
        stream: &str,
        consumer: &ConsumerSettings,
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(BackendError::broker("injected consumer write failure"));
        }
        let mut existing = self
            .consumers
            .get_mut(&Self::consumer_key(stream, &consumer.name))
            .ok_or_else(|| BackendError::not_found(format!("consumer {}", consumer.name)))?;
        *existing = consumer.clone();
        Ok(())
    }

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BackendError> {
        self.ensure_connected()?;
        if self.fail_deletes.contains(consumer) {
            return Err(BackendError::broker(format!(
                "injected delete failure for consumer {consumer}"
            )));
        }
        self.consumers
            .remove(&Self::consumer_key(stream, consumer))
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found(format!("consumer {consumer}")))
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BackendError> {
        self.ensure_connected()?;
        Ok(self.consumers(stream).into_iter().map(|c| c.name).collect())
    }
}
