//! Symmetric chunk encryption for file bodies.
//!
//! Provides:
//! - `SharedKey`: a 32-byte pre-shared key, loaded from base64 or derived
//!   from a passphrase.
//! - `Cipher`: XChaCha20-Poly1305 AEAD applied to each body chunk on its own.
//!
//! Security properties:
//! - Key material is zeroed on drop via the `zeroize` crate.
//! - Passphrases go through BLAKE3 key derivation (domain-separated).
//! - Every chunk gets a fresh random 24-byte nonce; chunks carry no state
//!   between calls, so each one authenticates independently.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, XChaCha20Poly1305, XNonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ShareError;
use crate::net::protocol::{NONCE_LEN, TAG_LEN};

/// Domain separation string for deriving keys from passphrases.
const KDF_CONTEXT: &str = "fileshare v1 xchacha20poly1305 passphrase key";

/// Length of a shared key in bytes.
pub const KEY_LEN: usize = 32;

/// Pre-shared symmetric key. Both peers must hold the same one.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_LEN]);

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedKey").field(&"[REDACTED]").finish()
    }
}

impl SharedKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let key = XChaCha20Poly1305::generate_key(&mut OsRng);
        Self(key.into())
    }

    /// Parse a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, ShareError> {
        let mut bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ShareError::Config(format!("Invalid base64 key: {}", e)))?;
        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(ShareError::Config(format!(
                "Key must be exactly {} bytes, got {}",
                KEY_LEN, len
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    /// Derive a key from a passphrase with BLAKE3 in key derivation mode.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, ShareError> {
        if passphrase.is_empty() {
            return Err(ShareError::Config("Passphrase must not be empty".into()));
        }
        Ok(Self(blake3::derive_key(KDF_CONTEXT, passphrase.as_bytes())))
    }

    /// Encode the key as base64 for display or config storage.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

/// Per-chunk XChaCha20-Poly1305 encryption with a shared key.
///
/// Encrypted chunk format: `[24-byte nonce][ciphertext + 16-byte Poly1305 tag]`,
/// so an encrypted chunk is always `NONCE_LEN + TAG_LEN` bytes longer than
/// its plaintext.
#[derive(Clone)]
pub struct Cipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    pub fn new(key: &SharedKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new((&key.0).into()),
        }
    }

    /// Encrypt one chunk with a random nonce, prefixing the nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ShareError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| ShareError::Protocol(format!("Encrypt failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt one chunk produced by [`Cipher::encrypt`].
    ///
    /// Fails with `ShareError::Decrypt` on a short chunk, a wrong key, or
    /// any tampering with nonce, ciphertext or tag.
    pub fn decrypt(&self, chunk: &[u8]) -> Result<Vec<u8>, ShareError> {
        if chunk.len() < NONCE_LEN + TAG_LEN {
            return Err(ShareError::Decrypt(format!(
                "Chunk of {} bytes is shorter than nonce and tag",
                chunk.len()
            )));
        }
        let (nonce, ciphertext) = chunk.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ShareError::Decrypt("authentication failed (wrong key or corrupted chunk)".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = Cipher::new(&SharedKey::generate());
        let plaintext = b"Hello, peer-to-peer file sharing!";

        let chunk = cipher.encrypt(plaintext).unwrap();
        assert_eq!(chunk.len(), plaintext.len() + NONCE_LEN + TAG_LEN);

        let decrypted = cipher.decrypt(&chunk).unwrap();
        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn encrypt_produces_different_ciphertext_each_time() {
        let cipher = Cipher::new(&SharedKey::generate());
        let ct1 = cipher.encrypt(b"same data").unwrap();
        let ct2 = cipher.encrypt(b"same data").unwrap();
        // Different random nonces
        assert_ne!(ct1[..NONCE_LEN], ct2[..NONCE_LEN]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let sender = Cipher::new(&SharedKey::generate());
        let receiver = Cipher::new(&SharedKey::generate());

        let chunk = sender.encrypt(b"secret data").unwrap();
        let err = receiver.decrypt(&chunk).unwrap_err();
        assert!(matches!(err, ShareError::Decrypt(_)));
    }

    #[test]
    fn decrypt_tampered_chunk_fails() {
        let cipher = Cipher::new(&SharedKey::generate());
        let mut chunk = cipher.encrypt(b"secret data").unwrap();
        let last = chunk.len() - 1;
        chunk[last] ^= 0x01;
        assert!(matches!(cipher.decrypt(&chunk), Err(ShareError::Decrypt(_))));
    }

    #[test]
    fn decrypt_short_chunk_fails() {
        let cipher = Cipher::new(&SharedKey::generate());
        let err = cipher.decrypt(&[0u8; NONCE_LEN]).unwrap_err();
        assert!(format!("{}", err).contains("shorter than nonce"));
    }

    #[test]
    fn encrypt_empty_data() {
        let cipher = Cipher::new(&SharedKey::generate());
        let chunk = cipher.encrypt(b"").unwrap();
        assert!(cipher.decrypt(&chunk).unwrap().is_empty());
    }

    #[test]
    fn chunks_decrypt_independently_in_any_order() {
        let cipher = Cipher::new(&SharedKey::generate());
        let a = cipher.encrypt(&[0xAA; 8192]).unwrap();
        let b = cipher.encrypt(&[0xBB; 100]).unwrap();
        assert_eq!(cipher.decrypt(&b).unwrap(), vec![0xBB; 100]);
        assert_eq!(cipher.decrypt(&a).unwrap(), vec![0xAA; 8192]);
    }

    #[test]
    fn base64_key_roundtrip() {
        let key = SharedKey::generate();
        let encoded = key.to_base64();
        assert_eq!(encoded.len(), 44);

        let parsed = SharedKey::from_base64(&encoded).unwrap();
        let chunk = Cipher::new(&key).encrypt(b"via base64").unwrap();
        assert_eq!(Cipher::new(&parsed).decrypt(&chunk).unwrap(), b"via base64");
    }

    #[test]
    fn base64_key_wrong_length_rejected() {
        let err = SharedKey::from_base64(&BASE64.encode([1u8; 16])).unwrap_err();
        assert!(format!("{}", err).contains("exactly 32 bytes"));
        assert!(SharedKey::from_base64("not base64!!").is_err());
    }

    #[test]
    fn passphrase_derivation_is_deterministic() {
        let a = SharedKey::from_passphrase("correct horse").unwrap();
        let b = SharedKey::from_passphrase("correct horse").unwrap();
        let c = SharedKey::from_passphrase("battery staple").unwrap();
        assert_eq!(a.to_base64(), b.to_base64());
        assert_ne!(a.to_base64(), c.to_base64());
        assert!(SharedKey::from_passphrase("").is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let key = SharedKey::generate();
        let shown = format!("{:?}", key);
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains(&key.to_base64()));
    }
}
