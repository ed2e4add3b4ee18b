use thiserror::Error;

use crate::subscription::ResourceKey;

/// Errors returned by resource stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Resource not found: {kind} {key}")]
    NotFound { kind: String, key: ResourceKey },

    #[error("Resource already exists: {kind} {key}")]
    AlreadyExists { kind: String, key: ResourceKey },

    #[error("Conflict updating {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: ResourceKey,
        message: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, key: ResourceKey) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key,
        }
    }

    pub fn already_exists(kind: impl Into<String>, key: ResourceKey) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key,
        }
    }

    pub fn conflict(kind: impl Into<String>, key: ResourceKey, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

/// Raised when an event type has nothing left after cleaning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CleanError {
    #[error("event type {raw:?} is empty after cleaning")]
    Empty { raw: String },
}

impl CleanError {
    pub fn empty(raw: impl Into<String>) -> Self {
        Self::Empty { raw: raw.into() }
    }
}

/// A Subscription spec that cannot be turned into backend terms.
///
/// Never retried: the user has to change the Subscription spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("subscription declares no event types")]
    NoEventTypes,

    #[error("event type {raw:?} cannot be cleaned: {source}")]
    Clean {
        raw: String,
        #[source]
        source: CleanError,
    },

    #[error("subject {subject:?} exceeds the maximum length of {max} characters")]
    SubjectTooLong { subject: String, max: usize },

    #[error("subject {subject:?} exceeds the limit of {max} segments")]
    TooManySegments { subject: String, max: usize },

    #[error("invalid sink {sink:?}: {reason}")]
    InvalidSink { sink: String, reason: String },
}

impl ConversionError {
    pub fn clean(raw: impl Into<String>, source: CleanError) -> Self {
        Self::Clean {
            raw: raw.into(),
            source,
        }
    }

    pub fn invalid_sink(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSink {
            sink: sink.into(),
            reason: reason.into(),
        }
    }

    pub fn is_invalid_sink(&self) -> bool {
        matches!(self, Self::InvalidSink { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let key = ResourceKey::new("ns", "a");
        assert!(StoreError::not_found("Subscription", key.clone()).is_not_found());
        assert!(StoreError::conflict("Subscription", key.clone(), "stale").is_transient());
        assert!(StoreError::already_exists("GatewayRule", key).is_conflict());
        assert!(!StoreError::internal("boom").is_transient());
    }

    #[test]
    fn test_conversion_error_display() {
        let err = ConversionError::clean("...", CleanError::empty("..."));
        assert_eq!(
            err.to_string(),
            "event type \"...\" cannot be cleaned: event type \"...\" is empty after cleaning"
        );
    }
}
