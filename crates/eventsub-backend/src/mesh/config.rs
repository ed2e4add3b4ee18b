//! Event mesh settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{ContentMode, Qos};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventMeshConfig {
    /// Base URL of the management API
    pub api_url: String,

    /// Cluster domain; gateway hosts are `<rule>.<domain>`
    pub domain: String,

    /// Mesh namespace, used as the event source
    pub namespace: String,

    /// Prepended to every cleaned type
    pub event_type_prefix: String,

    pub qos: Qos,
    pub content_mode: ContentMode,
    pub exempt_handshake: bool,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Tokens are refreshed this long before they expire
    #[serde(with = "humantime_serde")]
    pub token_refresh_margin: Duration,
}

impl Default for EventMeshConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            domain: String::new(),
            namespace: String::new(),
            event_type_prefix: String::new(),
            qos: Qos::AtLeastOnce,
            content_mode: ContentMode::Structured,
            exempt_handshake: true,
            request_timeout: Duration::from_secs(10),
            token_refresh_margin: Duration::from_secs(30),
        }
    }
}

impl EventMeshConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.api_url.trim().is_empty() {
            return Err("event_mesh.api_url must not be empty".into());
        }
        if url::Url::parse(&self.api_url).is_err() {
            return Err(format!("event_mesh.api_url {:?} is not a valid URL", self.api_url));
        }
        if self.domain.trim().is_empty() {
            return Err("event_mesh.domain must not be empty".into());
        }
        if self.namespace.trim().is_empty() {
            return Err("event_mesh.namespace must not be empty".into());
        }
        if self.request_timeout.is_zero() {
            return Err("event_mesh.request_timeout must be positive".into());
        }
        Ok(())
    }
}
