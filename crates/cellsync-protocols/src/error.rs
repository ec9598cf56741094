//! Error types for cellsync-protocols.

use thiserror::Error;

/// Result type for cellsync-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while applying kernel messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Inbound frame was not a recognizable kernel message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Status update carried a value outside idle/busy/stopped/disconnected.
    #[error("unknown cell status: {0:?}")]
    UnknownStatus(String),

    /// Connectivity value was not CONNECTING/OPEN/CLOSED.
    #[error("unknown connectivity status: {0:?}")]
    UnknownConnectivity(String),

    /// Outbound message could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
