//! Controller error taxonomy.

use std::fmt;

use eventsub_backend::BackendError;
use eventsub_core::{ConversionError, ResourceKey, StoreError};
use thiserror::Error;

use crate::manager::ManagerState;

pub type EventingResult<T> = Result<T, EventingError>;

#[derive(Debug, Error)]
pub enum EventingError {
    /// Missing or invalid configuration. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend could not converge a Subscription. Retryable.
    #[error("Failed to sync subscription {key}: {source}")]
    Sync {
        key: ResourceKey,
        #[source]
        source: BackendError,
    },

    /// The Subscription spec cannot be expressed on the backend. Terminal
    /// until the spec changes.
    #[error("Failed to convert subscription {key}: {source}")]
    Conversion {
        key: ResourceKey,
        #[source]
        source: ConversionError,
    },

    /// Subscriptions could not be listed; aborts the pass that needed them.
    #[error("Failed to list subscriptions: {0}")]
    List(#[source] StoreError),

    #[error(transparent)]
    CleanupItem(#[from] CleanupItemError),

    #[error("Cannot {action} subscription manager while {state}")]
    State {
        action: &'static str,
        state: ManagerState,
    },

    /// Backend setup failed during start.
    #[error("Failed to initialize {backend} backend: {source}")]
    Startup {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EventingError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn state(action: &'static str, state: ManagerState) -> Self {
        Self::State { action, state }
    }

    pub fn sync(key: ResourceKey, source: BackendError) -> Self {
        match source {
            BackendError::Conversion(source) => Self::Conversion { key, source },
            source => Self::Sync { key, source },
        }
    }

    /// Whether the external queue should try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sync { source, .. } => source.is_retryable(),
            Self::Store(e) | Self::List(e) => e.is_transient(),
            Self::Startup { source, .. } => source.is_retryable(),
            Self::Config(_) | Self::Conversion { .. } | Self::State { .. } => false,
            Self::CleanupItem(_) => false,
        }
    }
}

/// Step of the per-Subscription cleanup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStage {
    ResetStatus,
    DeleteBackend,
    DeleteSideResource,
}

impl fmt::Display for CleanupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResetStatus => f.write_str("status reset"),
            Self::DeleteBackend => f.write_str("backend delete"),
            Self::DeleteSideResource => f.write_str("side resource delete"),
        }
    }
}

/// One failed step for one Subscription during a cleanup sweep.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cleanup of {key} failed at {stage}: {message}")]
pub struct CleanupItemError {
    pub key: ResourceKey,
    pub stage: CleanupStage,
    pub message: String,
}

impl CleanupItemError {
    pub fn new(key: ResourceKey, stage: CleanupStage, error: impl fmt::Display) -> Self {
        Self {
            key,
            stage,
            message: error.to_string(),
        }
    }
}
