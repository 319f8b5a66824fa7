//! Server error types.

use std::io;

use lockstep_core::ClientId;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the coordinator.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (listener, stream).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, decoding).
    #[error("Protocol error: {0}")]
    Protocol(#[from] lockstep_protocol::ProtocolError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A session with this client id is already registered.
    #[error("client id {id} is already connected")]
    DuplicateClient { id: ClientId },

    /// The first line of a connection was not a usable connect message.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    /// Shutdown requested.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a handshake rejection.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            reason: reason.into(),
        }
    }
}
