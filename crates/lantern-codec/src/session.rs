//! Frame session: secret derivation and the encrypted frame transport.
//!
//! After the AUTH / AUTH-ACK exchange both sides derive three secrets by
//! keccak chaining over the ephemeral agreement, then key one stream cipher
//! per direction and two running MACs seeded with the handshake ciphertexts.
//! Every frame is a 32-byte encrypted header (carrying a 3-byte big-endian
//! payload length) followed by the payload padded to a 16-byte boundary,
//! each with a 16-byte MAC trailer.

use subtle::ConstantTimeEq;
use tracing::trace;

use crate::error::CodecError;
use crate::provider::{CryptoProvider, FrameMac, PublicKey, SecretKey, StreamCipher};

/// Encrypted header block: 16 bytes of header data + 16-byte MAC.
pub const HEADER_LEN: usize = 32;
/// MAC trailer length.
pub const MAC_LEN: usize = 16;
/// Frame bodies are padded to this boundary before encryption.
pub const FRAME_PAD: usize = 16;

/// The handshake material both sides hold once AUTH and AUTH-ACK have been
/// exchanged. `auth_cipher` and `ack_cipher` are the blobs exactly as sent
/// on the wire; they seed the two running MACs.
pub struct HandshakeTranscript<'a> {
    /// This side's handshake nonce.
    pub local_nonce: &'a [u8; 32],
    /// The peer's handshake nonce.
    pub remote_nonce: &'a [u8; 32],
    /// The AUTH ciphertext as sent.
    pub auth_cipher: &'a [u8],
    /// The AUTH-ACK ciphertext as sent.
    pub ack_cipher: &'a [u8],
}

/// A live frame session: one cipher and one running MAC per direction.
pub struct Session {
    encrypt: Box<dyn StreamCipher>,
    decrypt: Box<dyn StreamCipher>,
    egress_mac: Box<dyn FrameMac>,
    ingress_mac: Box<dyn FrameMac>,
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

impl Session {
    /// Derive the session on the side that sent AUTH.
    pub fn initiator(
        provider: &dyn CryptoProvider,
        local_ephemeral: &SecretKey,
        remote_ephemeral: &PublicKey,
        transcript: &HandshakeTranscript<'_>,
    ) -> Result<Self, CodecError> {
        Self::derive(provider, local_ephemeral, remote_ephemeral, transcript, true)
    }

    /// Derive the session on the side that answered with AUTH-ACK.
    pub fn responder(
        provider: &dyn CryptoProvider,
        local_ephemeral: &SecretKey,
        remote_ephemeral: &PublicKey,
        transcript: &HandshakeTranscript<'_>,
    ) -> Result<Self, CodecError> {
        Self::derive(provider, local_ephemeral, remote_ephemeral, transcript, false)
    }

    fn derive(
        provider: &dyn CryptoProvider,
        local_ephemeral: &SecretKey,
        remote_ephemeral: &PublicKey,
        transcript: &HandshakeTranscript<'_>,
        is_initiator: bool,
    ) -> Result<Self, CodecError> {
        let ephemeral_shared = provider.ecdh(local_ephemeral, remote_ephemeral)?;

        // The nonce hash orders recipient nonce first.
        let (recipient_nonce, initiator_nonce) = if is_initiator {
            (transcript.remote_nonce, transcript.local_nonce)
        } else {
            (transcript.local_nonce, transcript.remote_nonce)
        };
        let mut nonce_material = Vec::with_capacity(64);
        nonce_material.extend_from_slice(recipient_nonce);
        nonce_material.extend_from_slice(initiator_nonce);
        let nonce_hash = provider.keccak256(&nonce_material);

        let chain = |tail: &[u8; 32]| -> [u8; 32] {
            let mut material = Vec::with_capacity(64);
            material.extend_from_slice(&ephemeral_shared);
            material.extend_from_slice(tail);
            provider.keccak256(&material)
        };
        let shared_secret = chain(&nonce_hash);
        let aes_secret = chain(&shared_secret);
        let mac_secret = chain(&aes_secret);

        let iv = [0u8; 16];
        let encrypt = provider.stream_cipher(&aes_secret, &iv);
        let decrypt = provider.stream_cipher(&aes_secret, &iv);

        // Each direction's MAC is seeded with the receiving side's nonce and
        // the blob the sending side put on the wire.
        let seed = |nonce: &[u8; 32], blob: &[u8]| -> Vec<u8> {
            let mut s = Vec::with_capacity(32 + blob.len());
            s.extend_from_slice(&xor32(&mac_secret, nonce));
            s.extend_from_slice(blob);
            s
        };
        let auth_seed = seed(recipient_nonce, transcript.auth_cipher);
        let ack_seed = seed(initiator_nonce, transcript.ack_cipher);

        let (egress_seed, ingress_seed) = if is_initiator {
            (auth_seed, ack_seed)
        } else {
            (ack_seed, auth_seed)
        };

        Ok(Self {
            encrypt,
            decrypt,
            egress_mac: provider.frame_mac(&mac_secret, &egress_seed),
            ingress_mac: provider.frame_mac(&mac_secret, &ingress_seed),
        })
    }

    /// Wire size of a frame body for a given payload length (padding plus
    /// MAC trailer, header not included).
    #[must_use]
    pub fn frame_body_len(payload_len: usize) -> usize {
        let pad = (FRAME_PAD - payload_len % FRAME_PAD) % FRAME_PAD;
        payload_len + pad + MAC_LEN
    }

    /// Encrypt one payload into a complete frame: header block plus body
    /// block, both MAC-trailed.
    pub fn encrypt_frame(&mut self, payload: &[u8]) -> Vec<u8> {
        let body_len = Self::frame_body_len(payload.len());
        let mut frame = Vec::with_capacity(HEADER_LEN + body_len);

        // Header data: 3-byte big-endian payload length, then the fixed
        // RLP-encoded empty capability/context pair, zero-padded to 16.
        let mut header = [0u8; 16];
        header[0] = (payload.len() >> 16) as u8;
        header[1] = (payload.len() >> 8) as u8;
        header[2] = payload.len() as u8;
        header[3] = 0xc2;
        header[4] = 0x80;
        header[5] = 0x80;
        self.encrypt.apply(&mut header);
        self.egress_mac.update(&header);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&self.egress_mac.tag());

        let mut body = vec![0u8; body_len - MAC_LEN];
        body[..payload.len()].copy_from_slice(payload);
        self.encrypt.apply(&mut body);
        self.egress_mac.update(&body);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&self.egress_mac.tag());

        trace!(payload_len = payload.len(), frame_len = frame.len(), "frame sealed");
        frame
    }

    /// Verify and decrypt a 32-byte header block, returning the payload
    /// length announced by the peer. The caller then reads
    /// [`Self::frame_body_len`] more bytes and hands them to
    /// [`Self::decrypt_frame`].
    pub fn decrypt_header(&mut self, header: &[u8; HEADER_LEN]) -> Result<usize, CodecError> {
        let (cipher, tag) = header.split_at(16);

        self.ingress_mac.update(cipher);
        let expected = self.ingress_mac.tag();
        if expected[..].ct_eq(tag).unwrap_u8() == 0 {
            return Err(CodecError::Mac);
        }

        let mut data = [0u8; 16];
        data.copy_from_slice(cipher);
        self.decrypt.apply(&mut data);

        Ok(((data[0] as usize) << 16) | ((data[1] as usize) << 8) | data[2] as usize)
    }

    /// Verify and decrypt a frame body, truncating the padding away.
    pub fn decrypt_frame(
        &mut self,
        body: &[u8],
        payload_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let expected_len = Self::frame_body_len(payload_len);
        if body.len() != expected_len {
            return Err(CodecError::Truncated {
                expected: expected_len,
                actual: body.len(),
            });
        }

        let (cipher, tag) = body.split_at(body.len() - MAC_LEN);
        self.ingress_mac.update(cipher);
        let expected = self.ingress_mac.tag();
        if expected[..].ct_eq(tag).unwrap_u8() == 0 {
            return Err(CodecError::Mac);
        }

        let mut payload = cipher.to_vec();
        self.decrypt.apply(&mut payload);
        payload.truncate(payload_len);
        trace!(payload_len, body_len = body.len(), "frame opened");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::auth::{make_auth, make_auth_ack, read_auth, read_auth_ack};
    use crate::testing::TestProvider;

    /// Run a full AUTH / AUTH-ACK exchange and derive both sides' sessions.
    fn session_pair(provider: &TestProvider) -> (Session, Session) {
        let init_static = SecretKey::from_bytes([1; 32]);
        let init_eph = SecretKey::from_bytes([2; 32]);
        let init_nonce = [3u8; 32];
        let recip_static = SecretKey::from_bytes([4; 32]);
        let recip_eph = SecretKey::from_bytes([5; 32]);
        let recip_nonce = [6u8; 32];

        let recip_public = provider.public_key(&recip_static);

        let auth = make_auth(provider, &init_static, &init_eph, &init_nonce, &recip_public)
            .unwrap();
        let request = read_auth(provider, &recip_static, &auth).unwrap();
        let ack =
            make_auth_ack(provider, &recip_eph, &recip_nonce, &request.remote_static).unwrap();
        let ack_parsed = read_auth_ack(provider, &init_static, &ack).unwrap();

        let initiator = Session::initiator(
            provider,
            &init_eph,
            &ack_parsed.remote_ephemeral,
            &HandshakeTranscript {
                local_nonce: &init_nonce,
                remote_nonce: &ack_parsed.remote_nonce,
                auth_cipher: &auth,
                ack_cipher: &ack,
            },
        )
        .unwrap();

        let responder = Session::responder(
            provider,
            &recip_eph,
            &request.remote_ephemeral,
            &HandshakeTranscript {
                local_nonce: &recip_nonce,
                remote_nonce: &request.remote_nonce,
                auth_cipher: &auth,
                ack_cipher: &ack,
            },
        )
        .unwrap();

        (initiator, responder)
    }

    fn recv(session: &mut Session, frame: &[u8]) -> Result<Vec<u8>, CodecError> {
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        let payload_len = session.decrypt_header(&header)?;
        session.decrypt_frame(&frame[HEADER_LEN..], payload_len)
    }

    #[test]
    fn frame_round_trip_both_directions() {
        let provider = TestProvider::new();
        let (mut a, mut b) = session_pair(&provider);

        let frame = a.encrypt_frame(b"hello light client");
        assert_eq!(recv(&mut b, &frame).unwrap(), b"hello light client");

        let frame = b.encrypt_frame(b"status");
        assert_eq!(recv(&mut a, &frame).unwrap(), b"status");
    }

    #[test]
    fn consecutive_frames_chain_the_mac() {
        let provider = TestProvider::new();
        let (mut a, mut b) = session_pair(&provider);

        for i in 0..5u8 {
            let payload = vec![i; 1 + i as usize * 7];
            let frame = a.encrypt_frame(&payload);
            assert_eq!(recv(&mut b, &frame).unwrap(), payload);
        }
    }

    #[test]
    fn body_is_padded_to_sixteen() {
        assert_eq!(Session::frame_body_len(0), 16);
        assert_eq!(Session::frame_body_len(1), 32);
        assert_eq!(Session::frame_body_len(16), 32);
        assert_eq!(Session::frame_body_len(17), 48);
    }

    #[test]
    fn corrupted_header_fails_the_mac() {
        let provider = TestProvider::new();
        let (mut a, mut b) = session_pair(&provider);

        let mut frame = a.encrypt_frame(b"payload");
        frame[0] ^= 0x01;
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        assert_eq!(b.decrypt_header(&header).unwrap_err(), CodecError::Mac);
    }

    #[test]
    fn corrupted_body_fails_the_mac() {
        let provider = TestProvider::new();
        let (mut a, mut b) = session_pair(&provider);

        let mut frame = a.encrypt_frame(b"payload");
        let last = frame.len() - MAC_LEN - 1;
        frame[last] ^= 0x01;

        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        let payload_len = b.decrypt_header(&header).unwrap();
        assert_eq!(
            b.decrypt_frame(&frame[HEADER_LEN..], payload_len).unwrap_err(),
            CodecError::Mac
        );
    }

    proptest! {
        #[test]
        fn any_payload_survives_framing(payload in prop::collection::vec(any::<u8>(), 0..600)) {
            let provider = TestProvider::new();
            let (mut a, mut b) = session_pair(&provider);

            let frame = a.encrypt_frame(&payload);
            prop_assert_eq!(
                frame.len(),
                HEADER_LEN + Session::frame_body_len(payload.len())
            );
            prop_assert_eq!((frame.len() - HEADER_LEN - MAC_LEN) % FRAME_PAD, 0);
            prop_assert_eq!(recv(&mut b, &frame).unwrap(), payload);
        }
    }
}
