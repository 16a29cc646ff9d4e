//! Deterministic crypto provider for tests.
//!
//! Backs every [`CryptoProvider`] operation with blake3 so the handshake and
//! frame transport can be exercised end-to-end without the external
//! secp256k1/ECIES collaborator. The key agreement is a commutative toy and
//! the signatures carry the signer's public key under a keystream mask; none
//! of this is secure, but every layout, length, and failure path matches the
//! production shape (ECIES overhead included).

use blake3::Hasher;

use crate::error::CodecError;
use crate::provider::{
    CryptoProvider, FrameMac, PublicKey, SecretKey, Signature, StreamCipher, ECIES_OVERHEAD,
    PUBLIC_KEY_LEN, SIGNATURE_LEN,
};

/// blake3-backed deterministic provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestProvider;

impl TestProvider {
    /// A fresh provider; stateless, so all instances agree.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn xof(domain: &[u8], parts: &[&[u8]], out: &mut [u8]) {
    let mut hasher = Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize_xof().fill(out);
}

fn xor_in_place(data: &mut [u8], mask: &[u8]) {
    for (d, m) in data.iter_mut().zip(mask.iter()) {
        *d ^= m;
    }
}

impl CryptoProvider for TestProvider {
    fn keccak256(&self, data: &[u8]) -> [u8; 32] {
        // Stand-in digest; only determinism matters here.
        *blake3::hash(data).as_bytes()
    }

    fn public_key(&self, secret: &SecretKey) -> PublicKey {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        xof(b"lantern.test.pub", &[secret.as_bytes()], &mut out);
        PublicKey::from_bytes(out)
    }

    fn ecdh(&self, secret: &SecretKey, public: &PublicKey) -> Result<[u8; 32], CodecError> {
        // Commutative toy agreement over the XOR of the two public keys.
        let local = self.public_key(secret);
        let mut mixed = local.to_bytes();
        xor_in_place(&mut mixed, public.as_bytes());
        let mut out = [0u8; 32];
        xof(b"lantern.test.ecdh", &[&mixed], &mut out);
        Ok(out)
    }

    fn sign(&self, secret: &SecretKey, digest: &[u8; 32]) -> Result<Signature, CodecError> {
        let public = self.public_key(secret);
        let mut mask = [0u8; PUBLIC_KEY_LEN];
        xof(b"lantern.test.sig", &[digest], &mut mask);

        let mut sig = [0u8; SIGNATURE_LEN];
        sig[..PUBLIC_KEY_LEN].copy_from_slice(public.as_bytes());
        xor_in_place(&mut sig[..PUBLIC_KEY_LEN], &mask);
        Ok(Signature(sig))
    }

    fn recover(
        &self,
        digest: &[u8; 32],
        signature: &Signature,
    ) -> Result<PublicKey, CodecError> {
        let mut mask = [0u8; PUBLIC_KEY_LEN];
        xof(b"lantern.test.sig", &[digest], &mut mask);

        let mut public = [0u8; PUBLIC_KEY_LEN];
        public.copy_from_slice(&signature.0[..PUBLIC_KEY_LEN]);
        xor_in_place(&mut public, &mask);
        Ok(PublicKey::from_bytes(public))
    }

    fn ecies_encrypt(&self, public: &PublicKey, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        // Layout mirrors production sealing: ephemeral key (65) + IV (16) +
        // ciphertext + MAC (32).
        let mut ephemeral = [0u8; 65];
        xof(b"lantern.test.eph", &[public.as_bytes(), plain], &mut ephemeral);
        let mut iv = [0u8; 16];
        xof(b"lantern.test.iv", &[&ephemeral], &mut iv);

        let mut body = plain.to_vec();
        let mut keystream = vec![0u8; body.len()];
        xof(
            b"lantern.test.seal",
            &[public.as_bytes(), &ephemeral],
            &mut keystream,
        );
        xor_in_place(&mut body, &keystream);

        let mut mac = [0u8; 32];
        xof(
            b"lantern.test.seal-mac",
            &[public.as_bytes(), &ephemeral, &body],
            &mut mac,
        );

        let mut cipher = Vec::with_capacity(plain.len() + ECIES_OVERHEAD);
        cipher.extend_from_slice(&ephemeral);
        cipher.extend_from_slice(&iv);
        cipher.extend_from_slice(&body);
        cipher.extend_from_slice(&mac);
        Ok(cipher)
    }

    fn ecies_decrypt(&self, secret: &SecretKey, cipher: &[u8]) -> Result<Vec<u8>, CodecError> {
        if cipher.len() < ECIES_OVERHEAD {
            return Err(CodecError::Truncated {
                expected: ECIES_OVERHEAD,
                actual: cipher.len(),
            });
        }
        let public = self.public_key(secret);

        let ephemeral = &cipher[..65];
        let body = &cipher[65 + 16..cipher.len() - 32];
        let mac = &cipher[cipher.len() - 32..];

        let mut expected = [0u8; 32];
        xof(
            b"lantern.test.seal-mac",
            &[public.as_bytes(), ephemeral, body],
            &mut expected,
        );
        if expected[..] != *mac {
            return Err(CodecError::Authentication);
        }

        let mut plain = body.to_vec();
        let mut keystream = vec![0u8; plain.len()];
        xof(
            b"lantern.test.seal",
            &[public.as_bytes(), ephemeral],
            &mut keystream,
        );
        xor_in_place(&mut plain, &keystream);
        Ok(plain)
    }

    fn stream_cipher(&self, key: &[u8; 32], iv: &[u8; 16]) -> Box<dyn StreamCipher> {
        let mut hasher = Hasher::new();
        hasher.update(b"lantern.test.stream");
        hasher.update(key);
        hasher.update(iv);
        Box::new(XofCipher {
            reader: hasher.finalize_xof(),
        })
    }

    fn frame_mac(&self, secret: &[u8; 32], seed: &[u8]) -> Box<dyn FrameMac> {
        let mut hasher = Hasher::new_keyed(secret);
        hasher.update(seed);
        Box::new(KeyedMac { hasher })
    }
}

/// Stream cipher drawing its keystream from a blake3 XOF.
struct XofCipher {
    reader: blake3::OutputReader,
}

impl StreamCipher for XofCipher {
    fn apply(&mut self, data: &mut [u8]) {
        let mut keystream = vec![0u8; data.len()];
        self.reader.fill(&mut keystream);
        xor_in_place(data, &keystream);
    }
}

/// Running MAC over a keyed blake3 hasher; `tag` finalizes a clone so the
/// running state is preserved.
struct KeyedMac {
    hasher: Hasher,
}

impl FrameMac for KeyedMac {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn tag(&self) -> [u8; 16] {
        let digest = self.hasher.clone().finalize();
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&digest.as_bytes()[..16]);
        tag
    }
}
