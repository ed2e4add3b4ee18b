//! Reconciliation events.
//!
//! The reconciler reports notable outcomes (synced, sync failed, deleted)
//! through an [`EventRecorder`]. [`EventBroadcaster`] fans them out over a
//! tokio broadcast channel so any number of listeners can observe them.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::subscription::ResourceKey;

/// Default buffer size for the broadcast channel.
/// Slow receivers lose the oldest events beyond this limit.
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    pub key: ResourceKey,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Sink for reconciliation events. Recording never fails.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: RecordedEvent);

    fn normal(&self, key: &ResourceKey, reason: &str, message: &str) {
        self.record(RecordedEvent {
            key: key.clone(),
            kind: EventKind::Normal,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        });
    }

    fn warning(&self, key: &ResourceKey, reason: &str, message: &str) {
        self.record(RecordedEvent {
            key: key.clone(),
            kind: EventKind::Warning,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        });
    }
}

pub type DynEventRecorder = Arc<dyn EventRecorder>;

/// Broadcast-channel event recorder.
///
/// Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<RecordedEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the number of subscribers that received the event.
    pub fn send(&self, event: RecordedEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Events sent before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventRecorder for EventBroadcaster {
    fn record(&self, event: RecordedEvent) {
        match event.kind {
            EventKind::Normal => tracing::debug!(
                subscription = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventKind::Warning => tracing::warn!(
                subscription = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
        self.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
