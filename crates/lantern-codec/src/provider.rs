//! Key material and the crypto provider seam.
//!
//! The asymmetric primitives (secp256k1, ECIES, keccak) live outside this
//! crate; the codec consumes them through [`CryptoProvider`]. The handshake
//! and frame layouts here are fixed regardless of which provider backs them,
//! so a deterministic test provider (see [`crate::testing`]) exercises the
//! same code paths as a production one.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CodecError;

/// Secret scalar length in bytes.
pub const SECRET_KEY_LEN: usize = 32;
/// Uncompressed public key length in bytes (no 0x04 prefix).
pub const PUBLIC_KEY_LEN: usize = 64;
/// Recoverable signature length in bytes (64-byte signature + recovery id).
pub const SIGNATURE_LEN: usize = 65;
/// Handshake nonce length in bytes.
pub const NONCE_LEN: usize = 32;
/// Ciphertext overhead added by ECIES sealing: ephemeral public key (65),
/// IV (16), and HMAC (32).
pub const ECIES_OVERHEAD: usize = 113;

/// A 32-byte secret scalar, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Import from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate from system randomness.
    pub fn random() -> Result<Self, CodecError> {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        getrandom::getrandom(&mut bytes).map_err(|_| CodecError::Randomness)?;
        Ok(Self(bytes))
    }

    /// Raw bytes. Handle with care.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// A 64-byte uncompressed public key (the 0x04 prefix is never carried).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Import from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of exactly [`PUBLIC_KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; PUBLIC_KEY_LEN] =
            bytes.try_into().map_err(|_| CodecError::Truncated {
                expected: PUBLIC_KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Raw bytes by value.
    #[must_use]
    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_LEN] {
        self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", hex::encode(&self.0[..4]))
    }
}

/// A 65-byte recoverable signature.
#[derive(Clone, Copy)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..4]))
    }
}

/// A symmetric stream cipher instance with its own keystream position.
pub trait StreamCipher: Send {
    /// Transform `data` in place, advancing the keystream.
    fn apply(&mut self, data: &mut [u8]);
}

/// A running frame MAC (one per direction of an RLPx session).
pub trait FrameMac: Send {
    /// Absorb ciphertext into the running state.
    fn update(&mut self, data: &[u8]);

    /// Current 16-byte tag. Must not disturb the running state.
    fn tag(&self) -> [u8; 16];
}

/// The asymmetric and symmetric primitives consumed by the codec.
pub trait CryptoProvider: Send + Sync {
    /// Keccak-256 digest.
    fn keccak256(&self, data: &[u8]) -> [u8; 32];

    /// Derive the public key for a secret scalar.
    fn public_key(&self, secret: &SecretKey) -> PublicKey;

    /// ECDH agreement; returns the 32-byte x-coordinate.
    fn ecdh(&self, secret: &SecretKey, public: &PublicKey) -> Result<[u8; 32], CodecError>;

    /// Recoverable signature over a 32-byte digest.
    fn sign(&self, secret: &SecretKey, digest: &[u8; 32]) -> Result<Signature, CodecError>;

    /// Recover the signer's public key from a digest and signature.
    fn recover(&self, digest: &[u8; 32], signature: &Signature)
        -> Result<PublicKey, CodecError>;

    /// ECIES sealing toward `public`; output is `plain.len() + ECIES_OVERHEAD`
    /// bytes.
    fn ecies_encrypt(&self, public: &PublicKey, plain: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// ECIES unsealing with `secret`.
    fn ecies_decrypt(&self, secret: &SecretKey, cipher: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Fresh stream cipher keyed for one direction of a session.
    fn stream_cipher(&self, key: &[u8; 32], iv: &[u8; 16]) -> Box<dyn StreamCipher>;

    /// Fresh frame MAC keyed with the session MAC secret and absorbed `seed`.
    fn frame_mac(&self, secret: &[u8; 32], seed: &[u8]) -> Box<dyn FrameMac>;
}
