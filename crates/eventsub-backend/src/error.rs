//! Backend error types.

use eventsub_core::{ConversionError, StoreError};

/// Errors raised by backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Sync or delete was called before `initialize`.
    #[error("Backend not initialized")]
    NotInitialized,

    /// `initialize` was called a second time.
    #[error("Backend already initialized")]
    AlreadyInitialized,

    /// The broker connection is down and could not be re-established.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The broker rejected or failed a request.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The addressed broker-side object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A management API call returned an unexpected status code.
    #[error("HTTP error calling {endpoint}: status {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The OAuth2 token endpoint refused or failed.
    #[error("Token request failed: {0}")]
    Token(String),

    /// A response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The gateway has not admitted the rule yet.
    #[error("Gateway rule {name} is not ready")]
    GatewayRuleNotReady { name: String },

    #[error("Invalid backend configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BackendError {
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn http(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Http { status, .. } => *status == 404,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether the same call may succeed later without a spec change.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Conversion(_) | Self::Config(_) | Self::AlreadyInitialized
        )
    }

    /// The conversion failure carried by this error, if any.
    pub fn as_conversion(&self) -> Option<&ConversionError> {
        match self {
            Self::Conversion(e) => Some(e),
            _ => None,
        }
    }
}
