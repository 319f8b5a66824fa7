//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting to the coordinator failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Framing or decoding error on the coordinator stream.
    #[error("protocol error: {0}")]
    Protocol(#[from] lockstep_protocol::ProtocolError),

    /// An operation needed a connection and there is none.
    #[error("not connected to a coordinator")]
    NotConnected,

    /// The coordinator closed the connection.
    #[error("disconnected from coordinator")]
    Disconnected,

    /// Coordinator failure while running the `server` command.
    #[error("server error: {0}")]
    Server(#[from] lockstep_server::ServerError),
}
