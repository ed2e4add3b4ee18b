//! The backend capability interface.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eventsub_core::{ResourceKey, Subscription};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Which backend variant a manager runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Stream,
    EventMesh,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::EventMesh => f.write_str("event-mesh"),
        }
    }
}

/// Bounds on a fully qualified subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectLimits {
    pub max_len: usize,
    pub max_segments: Option<usize>,
}

/// Backend-owned object tied to a Subscription that outlives a plain
/// consumer delete and has to be cleaned up separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideResource {
    /// Gateway rule shared by every Subscription pointing at one sink
    /// service. A release drops `owner` and the rule goes once no owner
    /// remains; a purge deletes the rule regardless of its owners.
    GatewayRule {
        rule: ResourceKey,
        owner: ResourceKey,
    },
}

impl fmt::Display for SideResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GatewayRule { rule, .. } => write!(f, "gateway rule {rule}"),
        }
    }
}

/// A broker technology that can hold one consumer per Subscription.
///
/// Implementations must be safe for concurrent calls on different
/// Subscriptions. Calls for the same Subscription are never concurrent.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// One-time setup. Fails with `AlreadyInitialized` on a second call.
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Converge the broker-side consumer onto the Subscription.
    ///
    /// Reads the cleaned types from `status.types` and records backend
    /// correlation fields on `status.backend`. Idempotent.
    async fn sync_subscription(&self, subscription: &mut Subscription) -> Result<(), BackendError>;

    /// Remove the consumer if present. Missing is success.
    async fn delete_subscription(&self, subscription: &Subscription) -> Result<(), BackendError>;

    /// The full subject a cleaned type is registered under.
    fn qualified_subject(&self, clean_type: &str) -> String;

    fn subject_limits(&self) -> SubjectLimits;

    /// Side resources recorded on the Subscription's status.
    fn side_resources(&self, _subscription: &Subscription) -> Vec<SideResource> {
        Vec::new()
    }

    /// Release the Subscription's hold on the resource. Missing is success.
    async fn delete_side_resource(&self, _resource: &SideResource) -> Result<(), BackendError> {
        Ok(())
    }

    /// Delete the resource outright. Returns `false` when it was already
    /// gone.
    async fn purge_side_resource(&self, _resource: &SideResource) -> Result<bool, BackendError> {
        Ok(false)
    }
}

pub type DynBackend = Arc<dyn Backend>;

/// Join a prefix and a cleaned type with `.`, skipping an empty prefix.
pub(crate) fn join_subject(prefix: &str, clean_type: &str) -> String {
    if prefix.is_empty() {
        clean_type.to_string()
    } else {
        format!("{prefix}.{clean_type}")
    }
}
