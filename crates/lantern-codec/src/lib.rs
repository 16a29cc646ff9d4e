//! RLPx session codec for LANTERN.
//!
//! Implements the byte-exact handshake-blob layouts and the encrypted frame
//! transport used to talk to Ethereum light-client nodes:
//!
//! - [`auth`]: AUTH / AUTH-ACK construction and parsing (307- and 210-byte
//!   ECIES blobs)
//! - [`session`]: secret derivation by keccak chaining and the
//!   header/body frame codec with running directional MACs
//! - [`provider`]: the [`CryptoProvider`] seam through which the external
//!   secp256k1/ECIES/keccak primitives are consumed
//! - [`testing`]: a deterministic blake3-backed provider for tests
//!
//! The codec never touches sockets; callers feed it bytes and send what it
//! returns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod error;
pub mod provider;
pub mod session;
pub mod testing;

pub use auth::{
    make_auth, make_auth_ack, read_auth, read_auth_ack, AuthAck, AuthRequest, ACK_CIPHER_LEN,
    ACK_PLAIN_LEN, AUTH_CIPHER_LEN, AUTH_PLAIN_LEN,
};
pub use error::CodecError;
pub use provider::{
    CryptoProvider, FrameMac, PublicKey, SecretKey, Signature, StreamCipher, ECIES_OVERHEAD,
    NONCE_LEN, PUBLIC_KEY_LEN, SECRET_KEY_LEN, SIGNATURE_LEN,
};
pub use session::{HandshakeTranscript, Session, HEADER_LEN, MAC_LEN};
