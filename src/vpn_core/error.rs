//! Error types for the tunnel client.

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error type used for error chaining across module boundaries.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Context wrapper that preserves an optional underlying source error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ErrorContext {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ErrorContext {
    /// Create context-only error (no underlying source).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create context error with an underlying source.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Tunnel client errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VpnError {
    /// Malformed or truncated frame on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer closed the stream on a frame boundary.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Dial/read/write/timeout failures.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Authorization handshake failed or the response was malformed.
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// OS command failure during interface/route setup, or invalid settings.
    #[error("Configuration error: {0}")]
    Config(#[source] ErrorContext),

    /// Server address resolution failed.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Virtual interface creation or I/O failed.
    #[error("TUN device error: {0}")]
    TunDevice(#[source] ErrorContext),

    /// A running session ended; carries the exit reasons of its workers.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl VpnError {
    /// Create a configuration error with context only.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(ErrorContext::new(message))
    }

    /// Create a configuration error with preserved source.
    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Config(ErrorContext::with_source(message, source))
    }

    /// Create a TUN device error with context only.
    pub fn tun_device(message: impl Into<String>) -> Self {
        Self::TunDevice(ErrorContext::new(message))
    }

    /// Create a TUN device error with preserved source.
    pub fn tun_device_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::TunDevice(ErrorContext::with_source(message, source))
    }
}

/// Result type alias for tunnel client operations.
pub type VpnResult<T> = Result<T, VpnError>;
