//! Error types for the relay session core.
//!
//! End-of-stream from the peer is not an error: it is the `Ok(None)` result
//! of [`MessageSource::receive`](crate::transport::MessageSource::receive).
//! Everything that ends a session abnormally is a [`RelayError`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Direction of a failed transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    Receive,
    Send,
}

impl std::fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportDirection::Receive => write!(f, "receive"),
            TransportDirection::Send => write!(f, "send"),
        }
    }
}

/// A connection fault reported by the transport layer.
///
/// Terminal for the session that observed it; never retried within a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport {direction} failed: {message}")]
pub struct TransportError {
    pub direction: TransportDirection,
    pub message: String,
}

impl TransportError {
    /// A fault raised while reading from the peer.
    pub fn receive(message: impl Into<String>) -> Self {
        Self {
            direction: TransportDirection::Receive,
            message: message.into(),
        }
    }

    /// A fault raised while writing to the peer.
    pub fn send(message: impl Into<String>) -> Self {
        Self {
            direction: TransportDirection::Send,
            message: message.into(),
        }
    }
}

/// Main error type for the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Stages did not acknowledge drain within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Configuration error for {field}: {message}")]
    Config { field: String, message: String },

    #[error("Message queue is closed")]
    QueueClosed,

    #[error("Session lifecycle is shutting down")]
    ShuttingDown,

    #[error("Session limit reached ({limit} active sessions)")]
    SessionLimit { limit: usize },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<crate::cancel::CancelledError> for RelayError {
    fn from(_: crate::cancel::CancelledError) -> Self {
        RelayError::Cancelled
    }
}

impl RelayError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration error for a named field.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        RelayError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convert to the status code reported to the RPC layer.
    ///
    /// Uses the gRPC status numbering:
    /// - 1: Cancelled
    /// - 2: Unknown
    /// - 3: Invalid argument
    /// - 4: Deadline exceeded
    /// - 8: Resource exhausted
    /// - 13: Internal
    /// - 14: Unavailable
    pub fn status_code(&self) -> i32 {
        match self {
            RelayError::Cancelled => 1,
            RelayError::Config { .. } | RelayError::Json { .. } => 3,
            RelayError::ShutdownTimeout(_) => 4,
            RelayError::SessionLimit { .. } => 8,
            RelayError::QueueClosed | RelayError::Io { .. } => 13,
            RelayError::Transport(_) | RelayError::ShuttingDown => 14,
            RelayError::Other(_) => 2,
        }
    }

    /// Whether this error came from the peer transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::Transport(_))
    }
}
