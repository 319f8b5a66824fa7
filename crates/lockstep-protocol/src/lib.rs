//! Wire protocol for lockstep frame synchronisation.
//!
//! The protocol is line-oriented text: each [`Message`] encodes to a single
//! line whose first field is a one-character command token. Fields are
//! separated by `|` and lines end with `\n`.
//!
//! # Example
//!
//! ```rust
//! use lockstep_protocol::{Message, decode, encode};
//!
//! let line = encode(&Message::broadcast("ball,120,40"));
//! assert_eq!(line, "T|ball,120,40\n");
//! assert_eq!(decode(&line).unwrap(), Message::broadcast("ball,120,40"));
//! ```

mod codec;
mod error;
mod framing;
mod types;

pub use codec::{
    FIELD_DELIMITER, LIST_SEPARATOR, MESSAGE_TERMINUS, decode, decode_embedded, encode,
    encode_embedded, sanitize,
};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{LineReader, LineWriter};
pub use types::{Command, EmbeddedData, Message, Targets};

/// Maximum line length in bytes, excluding the terminus (1 MB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
