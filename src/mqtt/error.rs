//! Error types for the broker connection and outbound publishes

use thiserror::Error;

/// Transport-level failures.
///
/// None of these are fatal: the connection manager converts them into
/// `ConnectionState::Error` plus a `last_error` message and the transport keeps
/// retrying on its reconnect interval.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The configured broker address could not be parsed
    #[error("Invalid broker url '{0}'")]
    InvalidBrokerUrl(String),

    /// The broker address uses a scheme no transport exists for
    #[error("Unsupported broker scheme '{0}'")]
    UnsupportedScheme(String),

    /// Refused connect, timeout, TLS or protocol failure reported by the client
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A single send attempt failed.
///
/// The gate surfaces these through `last_error` and deliberately does not start
/// a cooldown, so the command can be retried straight away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The command could not be encoded as JSON
    #[error("Failed to encode command: {0}")]
    Encode(String),

    /// The client refused to queue the publish
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// The connection dropped before the broker acknowledged the publish
    #[error("Connection lost before the broker acknowledged the publish")]
    ConnectionLost,

    /// No transport is attached (never connected or already torn down)
    #[error("No active broker connection")]
    NotConnected,
}
