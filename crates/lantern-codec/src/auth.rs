//! AUTH / AUTH-ACK handshake blobs.
//!
//! Both blobs have fixed plaintext layouts and are sealed with ECIES toward
//! the peer's static key. The initiator sends AUTH, the recipient answers
//! with AUTH-ACK, and both sides then derive the frame session from the two
//! ciphertexts (see [`crate::session`]).

use crate::error::CodecError;
use crate::provider::{
    CryptoProvider, PublicKey, SecretKey, ECIES_OVERHEAD, NONCE_LEN, PUBLIC_KEY_LEN,
    SIGNATURE_LEN,
};

/// AUTH plaintext: signature (65) + keccak of ephemeral public key (32) +
/// static public key (64) + nonce (32) + version byte (1).
pub const AUTH_PLAIN_LEN: usize = SIGNATURE_LEN + 32 + PUBLIC_KEY_LEN + NONCE_LEN + 1;
/// AUTH ciphertext length on the wire.
pub const AUTH_CIPHER_LEN: usize = AUTH_PLAIN_LEN + ECIES_OVERHEAD;

/// AUTH-ACK plaintext: ephemeral public key (64) + nonce (32) + version
/// byte (1).
pub const ACK_PLAIN_LEN: usize = PUBLIC_KEY_LEN + NONCE_LEN + 1;
/// AUTH-ACK ciphertext length on the wire.
pub const ACK_CIPHER_LEN: usize = ACK_PLAIN_LEN + ECIES_OVERHEAD;

/// Fields parsed out of a received AUTH blob.
#[derive(Debug)]
pub struct AuthRequest {
    /// Initiator's ephemeral public key, recovered from the signature.
    pub remote_ephemeral: PublicKey,
    /// Initiator's static public key.
    pub remote_static: PublicKey,
    /// Initiator's handshake nonce.
    pub remote_nonce: [u8; NONCE_LEN],
}

/// Fields parsed out of a received AUTH-ACK blob.
#[derive(Debug)]
pub struct AuthAck {
    /// Recipient's ephemeral public key.
    pub remote_ephemeral: PublicKey,
    /// Recipient's handshake nonce.
    pub remote_nonce: [u8; NONCE_LEN],
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Build the initiator's AUTH ciphertext.
///
/// The signature is made with the *ephemeral* key over the static ECDH
/// agreement XORed with the nonce; the recipient recovers the ephemeral
/// public key from it.
pub fn make_auth(
    provider: &dyn CryptoProvider,
    local_static: &SecretKey,
    local_ephemeral: &SecretKey,
    local_nonce: &[u8; NONCE_LEN],
    remote_static: &PublicKey,
) -> Result<Vec<u8>, CodecError> {
    let shared = provider.ecdh(local_static, remote_static)?;
    let digest = xor32(&shared, local_nonce);
    let signature = provider.sign(local_ephemeral, &digest)?;

    let ephemeral_public = provider.public_key(local_ephemeral);
    let static_public = provider.public_key(local_static);

    let mut plain = [0u8; AUTH_PLAIN_LEN];
    plain[..SIGNATURE_LEN].copy_from_slice(&signature.0);
    plain[SIGNATURE_LEN..SIGNATURE_LEN + 32]
        .copy_from_slice(&provider.keccak256(ephemeral_public.as_bytes()));
    plain[SIGNATURE_LEN + 32..SIGNATURE_LEN + 32 + PUBLIC_KEY_LEN]
        .copy_from_slice(static_public.as_bytes());
    plain[SIGNATURE_LEN + 32 + PUBLIC_KEY_LEN..AUTH_PLAIN_LEN - 1]
        .copy_from_slice(local_nonce);
    // trailing version byte stays 0x00

    provider.ecies_encrypt(remote_static, &plain)
}

/// Parse a received AUTH ciphertext (recipient side).
pub fn read_auth(
    provider: &dyn CryptoProvider,
    local_static: &SecretKey,
    cipher: &[u8],
) -> Result<AuthRequest, CodecError> {
    if cipher.len() != AUTH_CIPHER_LEN {
        return Err(CodecError::Authentication);
    }
    let plain = provider.ecies_decrypt(local_static, cipher)?;
    if plain.len() != AUTH_PLAIN_LEN {
        return Err(CodecError::Authentication);
    }

    let mut sig = [0u8; SIGNATURE_LEN];
    sig.copy_from_slice(&plain[..SIGNATURE_LEN]);
    let remote_static =
        PublicKey::from_slice(&plain[SIGNATURE_LEN + 32..SIGNATURE_LEN + 32 + PUBLIC_KEY_LEN])?;
    let mut remote_nonce = [0u8; NONCE_LEN];
    remote_nonce.copy_from_slice(&plain[SIGNATURE_LEN + 32 + PUBLIC_KEY_LEN..AUTH_PLAIN_LEN - 1]);

    let shared = provider.ecdh(local_static, &remote_static)?;
    let digest = xor32(&shared, &remote_nonce);
    let remote_ephemeral = provider.recover(&digest, &crate::provider::Signature(sig))?;

    Ok(AuthRequest {
        remote_ephemeral,
        remote_static,
        remote_nonce,
    })
}

/// Build the recipient's AUTH-ACK ciphertext.
pub fn make_auth_ack(
    provider: &dyn CryptoProvider,
    local_ephemeral: &SecretKey,
    local_nonce: &[u8; NONCE_LEN],
    remote_static: &PublicKey,
) -> Result<Vec<u8>, CodecError> {
    let ephemeral_public = provider.public_key(local_ephemeral);

    let mut plain = [0u8; ACK_PLAIN_LEN];
    plain[..PUBLIC_KEY_LEN].copy_from_slice(ephemeral_public.as_bytes());
    plain[PUBLIC_KEY_LEN..ACK_PLAIN_LEN - 1].copy_from_slice(local_nonce);

    provider.ecies_encrypt(remote_static, &plain)
}

/// Parse a received AUTH-ACK ciphertext (initiator side).
///
/// A blob of the wrong size, or one that decrypts to the wrong plaintext
/// length, is an authentication failure.
pub fn read_auth_ack(
    provider: &dyn CryptoProvider,
    local_static: &SecretKey,
    cipher: &[u8],
) -> Result<AuthAck, CodecError> {
    if cipher.len() != ACK_CIPHER_LEN {
        return Err(CodecError::Authentication);
    }
    let plain = provider.ecies_decrypt(local_static, cipher)?;
    if plain.len() != ACK_PLAIN_LEN {
        return Err(CodecError::Authentication);
    }

    let remote_ephemeral = PublicKey::from_slice(&plain[..PUBLIC_KEY_LEN])?;
    let mut remote_nonce = [0u8; NONCE_LEN];
    remote_nonce.copy_from_slice(&plain[PUBLIC_KEY_LEN..ACK_PLAIN_LEN - 1]);

    Ok(AuthAck {
        remote_ephemeral,
        remote_nonce,
    })
}
