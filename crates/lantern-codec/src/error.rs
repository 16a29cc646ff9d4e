//! Error types for the session codec.

use thiserror::Error;

/// Errors raised by handshake-blob handling and frame encryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A handshake blob failed to decrypt or had the wrong plaintext layout.
    #[error("handshake authentication failed")]
    Authentication,

    /// A frame MAC tag did not match the running MAC state.
    #[error("frame MAC mismatch")]
    Mac,

    /// ECDH key agreement rejected the peer's public key.
    #[error("key agreement failed")]
    KeyAgreement,

    /// A recoverable signature could not be produced or recovered.
    #[error("signature operation failed")]
    Signature,

    /// System randomness was unavailable.
    #[error("system randomness unavailable")]
    Randomness,

    /// Input shorter than the fixed layout requires.
    #[error("truncated input: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the layout calls for.
        expected: usize,
        /// Bytes actually supplied.
        actual: usize,
    },
}
