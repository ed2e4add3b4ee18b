use std::collections::BTreeMap;
use std::time::Duration;

use eventsub_backend::{BackendKind, EventMeshConfig, StreamConfig};
use eventsub_core::ApplicationRegistry;
use serde::{Deserialize, Serialize};

use crate::error::{EventingError, EventingResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventingConfig {
    /// Which backend variant the manager runs
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub event_mesh: EventMeshConfig,
    #[serde(default)]
    pub cleaner: CleanerConfig,
    #[serde(default)]
    pub subscription_defaults: SubscriptionDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EventingConfig {
    /// Only the selected backend's section is checked.
    pub fn validate(&self) -> EventingResult<()> {
        match self.backend {
            BackendKind::Stream => self.stream.validate().map_err(EventingError::Config)?,
            BackendKind::EventMesh => self.event_mesh.validate().map_err(EventingError::Config)?,
        }
        if self.subscription_defaults.requeue_after.is_zero() {
            return Err(EventingError::config(
                "subscription_defaults.requeue_after must be positive",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(EventingError::config("logging.level must not be empty"));
        }
        Ok(())
    }
}

/// Event type cleaning rules.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CleanerConfig {
    /// Leading segments stripped from raw event types
    #[serde(default)]
    pub strip_prefix: String,
    /// Application name to application type. Non-empty switches to the
    /// registry-driven cleaner.
    #[serde(default)]
    pub applications: BTreeMap<String, String>,
}

impl CleanerConfig {
    pub fn registry(&self) -> ApplicationRegistry {
        self.applications
            .iter()
            .map(|(name, app_type)| (name.clone(), app_type.clone()))
            .collect()
    }
}

/// Defaults captured by the reconciler at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionDefaults {
    /// Delay the external queue should wait before retrying a failed sync
    #[serde(default = "default_requeue_after", with = "humantime_serde")]
    pub requeue_after: Duration,
    /// Check sinks before any backend call
    #[serde(default = "default_validate_sinks")]
    pub validate_sinks: bool,
}

fn default_requeue_after() -> Duration {
    Duration::from_secs(10)
}

fn default_validate_sinks() -> bool {
    true
}

impl Default for SubscriptionDefaults {
    fn default() -> Self {
        Self {
            requeue_after: default_requeue_after(),
            validate_sinks: default_validate_sinks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::EventingConfig;
    use crate::error::{EventingError, EventingResult};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "eventsub.toml";

    /// Load from an optional TOML file, then apply `EVENTSUB__*` overrides.
    pub fn load_config(path: Option<&str>) -> EventingResult<EventingConfig> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(EventingError::config(format!(
                "config file {} does not exist",
                file.display()
            )));
        }
        // e.g. EVENTSUB__STREAM__MAX_IN_FLIGHT=20
        builder = builder.add_source(
            Environment::with_prefix("EVENTSUB")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| EventingError::config(format!("config build error: {e}")))?;
        let merged: EventingConfig = cfg
            .try_deserialize()
            .map_err(|e| EventingError::config(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
