//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding or framing wire lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line had no content.
    #[error("empty line")]
    EmptyLine,

    /// The leading command token is not one we know.
    #[error("unknown command token: {0:?}")]
    UnknownCommand(String),

    /// A connect line had the wrong number of fields.
    #[error("malformed handshake '{command}': expected {expected} fields, got {found}")]
    MalformedHandshake {
        command: char,
        expected: usize,
        found: usize,
    },

    /// A non-handshake line had the wrong number of fields.
    #[error("malformed '{command}' line: expected {expected} fields, got {found}")]
    FieldCount {
        command: char,
        expected: &'static str,
        found: usize,
    },

    /// A numeric field did not parse.
    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// The wants-data flag was neither `true` nor `false`.
    #[error("invalid boolean flag: {0:?}")]
    InvalidBool(String),

    /// An embedded data segment inside a next-frame line was unusable.
    #[error("malformed data message: {0:?}")]
    MalformedDataMessage(String),

    /// A line exceeded the maximum length before its terminus.
    #[error("line too long: more than {max} bytes")]
    LineTooLong { max: usize },

    /// The stream ended in the middle of a line.
    #[error("incomplete line: {received} bytes without a terminus")]
    IncompleteLine { received: usize },

    /// The line was not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true for errors after which the byte stream cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::LineTooLong { .. } | Self::IncompleteLine { .. }
        )
    }
}
