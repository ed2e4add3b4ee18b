//! Stream broker settings.

use std::time::Duration;

use eventsub_core::subscription::DEFAULT_MAX_IN_FLIGHT_MESSAGES;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Limits,
    Interest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    Old,
    #[default]
    New,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    All,
    Last,
    LastPerSubject,
    #[default]
    New,
}

/// Stream broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Broker URL
    pub url: String,

    /// Shared stream all consumers are attached to
    pub stream_name: String,

    /// Prepended to every cleaned type; empty means none
    pub subject_prefix: String,

    pub storage: StorageType,
    pub retention: RetentionPolicy,
    pub discard: DiscardPolicy,

    /// -1 for unlimited
    pub max_messages: i64,

    /// -1 for unlimited
    pub max_bytes: i64,

    pub replicas: usize,
    pub deliver_policy: DeliverPolicy,

    /// Default max ack pending per consumer
    pub max_in_flight: u32,

    #[serde(with = "humantime_serde")]
    pub ack_wait: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            stream_name: "eventsub".to_string(),
            subject_prefix: String::new(),
            storage: StorageType::File,
            retention: RetentionPolicy::Limits,
            discard: DiscardPolicy::New,
            max_messages: -1,
            max_bytes: -1,
            replicas: 1,
            deliver_policy: DeliverPolicy::New,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT_MESSAGES,
            ack_wait: Duration::from_secs(30),
        }
    }
}

impl StreamConfig {
    /// Subjects the stream captures.
    pub fn stream_subjects(&self) -> Vec<String> {
        if self.subject_prefix.is_empty() {
            vec![">".to_string()]
        } else {
            vec![format!("{}.>", self.subject_prefix)]
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("stream.url must not be empty".into());
        }
        if self.stream_name.trim().is_empty() {
            return Err("stream.stream_name must not be empty".into());
        }
        if self.replicas == 0 {
            return Err("stream.replicas must be at least 1".into());
        }
        if self.max_in_flight == 0 {
            return Err("stream.max_in_flight must be at least 1".into());
        }
        Ok(())
    }
}
