//! Error types for the connection engine.

use thiserror::Error;

/// Errors raised by a [`MessageCoder`](crate::message::MessageCoder)
/// implementation. The engine treats any of these as an RLP-parse failure on
/// the peer's part.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoderError {
    /// The payload bytes did not parse.
    #[error("malformed message payload")]
    Malformed,

    /// The identifier byte names no known message.
    #[error("unknown message identifier {0:#04x}")]
    UnknownIdentifier(u8),

    /// The identifier byte and the payload disagree.
    #[error("identifier does not match payload")]
    IdentifierMismatch,
}
