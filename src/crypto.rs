//! Cryptographic primitives for field-level PII encryption.
//!
//! Provides the [`Key`] material type, the [`Encrypter`] seam, and the
//! default AES-256-GCM implementation. Encryption binds the namespace into
//! the authenticated associated data so a ciphertext cannot be replayed
//! under another tenant.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, KeyEngineError};

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Plain-text value of a per-subject encryption key.
///
/// The key material is zeroized on drop and never printed: both `Debug` and
/// `Display` render a fixed redaction string.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    bytes: Vec<u8>,
}

impl Key {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate a new random key of the given length.
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Get the key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY-*****")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY-*****")
    }
}

/// Map of keys indexed by subject ID.
pub type KeyMap = HashMap<String, Key>;

/// Key factory used by key engines when minting material for new subjects.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(&self, namespace: &str, key_id: &str) -> Result<Key, KeyEngineError>;
}

/// Generates random 256-bit keys, the native length of [`Aes256GcmEncrypter`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes256KeyGenerator;

#[async_trait]
impl KeyGenerator for Aes256KeyGenerator {
    async fn generate(&self, _namespace: &str, _key_id: &str) -> Result<Key, KeyEngineError> {
        Ok(Key::generate(AES_256_KEY_SIZE))
    }
}

/// Builds the associated data binding a ciphertext to its namespace: the
/// literal bytes `ns:<namespace>`, empty when the namespace is empty.
pub(crate) fn namespace_aad(namespace: &str) -> Vec<u8> {
    if namespace.is_empty() {
        return Vec::new();
    }
    let mut aad = b"ns:".to_vec();
    aad.extend_from_slice(namespace.as_bytes());
    aad
}

/// Authenticated encryption of a single PII field value under a per-subject
/// data key.
pub trait Encrypter: Send + Sync {
    /// Encrypts the given plain text value and returns the cipher bytes.
    fn encrypt(&self, namespace: &str, key: &Key, plaintext: &str) -> Result<Vec<u8>, CryptoError>;

    /// Decrypts the given cipher bytes and returns the original value.
    fn decrypt(&self, namespace: &str, key: &Key, ciphertext: &[u8]) -> Result<String, CryptoError>;

    /// Returns a generator producing keys of the algorithm's native length.
    fn key_generator(&self) -> Arc<dyn KeyGenerator>;
}

/// AES-256-GCM encrypter.
///
/// Each call draws a fresh random nonce and prepends it to the ciphertext,
/// so encryption is non-deterministic. The namespace is bound as associated
/// data; decryption under the wrong key or namespace fails authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes256GcmEncrypter;

impl Aes256GcmEncrypter {
    pub fn new() -> Self {
        Self
    }
}

impl Encrypter for Aes256GcmEncrypter {
    fn encrypt(&self, namespace: &str, key: &Key, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        if key.len() != AES_256_KEY_SIZE {
            return Err(CryptoError::Encryption(format!(
                "invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("cipher init error: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = namespace_aad(namespace);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(format!("encryption error: {e}")))?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, namespace: &str, key: &Key, ciphertext: &[u8]) -> Result<String, CryptoError> {
        if key.len() != AES_256_KEY_SIZE {
            return Err(CryptoError::Decryption(format!(
                "invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                key.len()
            )));
        }
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(
                "invalid ciphertext length".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Decryption(format!("cipher init error: {e}")))?;

        let (nonce_bytes, cipher_bytes) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let aad = namespace_aad(namespace);
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: cipher_bytes,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Decryption("authentication error".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    fn key_generator(&self) -> Arc<dyn KeyGenerator> {
        Arc::new(Aes256KeyGenerator)
    }
}
