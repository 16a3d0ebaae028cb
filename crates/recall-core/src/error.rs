//! Error types shared across Recall.

use std::time::Duration;

use thiserror::Error;

use crate::models::ResourceKind;

/// The error taxonomy for every store, network, bus and command operation.
///
/// Pagination exhaustion is deliberately absent: running out of content is
/// reported as [`RotationOutcome::Exhausted`](crate::rotation::RotationOutcome),
/// never as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecallError {
    /// The session store could not be read or written.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// The message bus is closed or the background process is not running.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend rejected the caller's credentials.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The backend answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response (connect, DNS, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded its deadline and was cancelled.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// An application-level failure (`{ success: false, error }`).
    #[error("{0}")]
    Application(String),

    /// A command with the same intent is already in flight for this target.
    #[error("Duplicate {kind} command already in flight for '{target}'")]
    Duplicate { kind: ResourceKind, target: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The request was malformed before it reached the network.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecallError {
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the default retry predicate should try this error again.
    ///
    /// - network errors and timeouts → retry
    /// - HTTP 5xx, 408, 429 → retry
    /// - HTTP 401 and any "unauthenticated" failure → never
    /// - other 4xx, store, bus, validation and local errors → never
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Authentication failures; callers redirect to re-authentication.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::Http { status: 401, .. })
    }

    /// Store or bus failures that are fatal to the current operation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Transport(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Stable machine-readable code used in bus responses and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Transport(_) => "transport",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Http { status: 401, .. } => "unauthenticated",
            Self::Http { .. } => "http",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Application(_) => "application",
            Self::Duplicate { .. } => "duplicate",
            Self::Serialization(_) => "serialization",
            Self::InvalidRequest(_) => "bad_request",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Conversion from anyhow::Error for host-side collaborators.
impl From<anyhow::Error> for RecallError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, RecallError>`.
pub type Result<T> = std::result::Result<T, RecallError>;
