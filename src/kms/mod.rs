//! Envelope encryption through an external key-management service.
//!
//! The [`KmsKeyEngine`] wrapper redefines what the wrapped engine stores:
//! instead of plaintext data keys, it persists ciphertexts of those keys
//! under a KMS master key. The associated data binding every KMS call is
//! the literal bytes `ns:<namespace>` (empty namespace means no associated
//! data), so a data-key ciphertext cannot be decrypted under another
//! tenant's context.

mod engine;
mod local;

pub use engine::KmsKeyEngine;
pub use local::LocalKms;

use async_trait::async_trait;

use crate::crypto::Key;
use crate::error::KmsError;

/// A data key freshly minted by the KMS: the plaintext for immediate use,
/// the ciphertext for storage.
pub struct DataKey {
    pub plaintext: Key,
    pub ciphertext: Vec<u8>,
}

/// Narrow client contract over the remote key-management service.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Mints a data key of `num_bytes` under the given master key.
    async fn generate_data_key(
        &self,
        master_key_id: &str,
        num_bytes: usize,
        aad: &[u8],
    ) -> Result<DataKey, KmsError>;

    /// Decrypts a stored data-key ciphertext under the given master key.
    async fn decrypt(
        &self,
        master_key_id: &str,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Key, KmsError>;

    /// Re-encrypts a data-key ciphertext from one master key to another
    /// without exposing the plaintext to the caller.
    async fn re_encrypt(
        &self,
        ciphertext: &[u8],
        source_master_id: &str,
        dest_master_id: &str,
        aad: &[u8],
    ) -> Result<Vec<u8>, KmsError>;
}

/// Maps `(namespace, subject)` to the master key protecting its data key,
/// and reports pending master-key rotations.
#[async_trait]
pub trait MasterKeyResolver: Send + Sync {
    async fn resolve(&self, namespace: &str, key_id: &str) -> Result<String, KmsError>;

    /// `(old, new)` when a new master key has been configured for the
    /// subject and its stored ciphertext should be re-encrypted.
    async fn pending_rotation(
        &self,
        _namespace: &str,
        _key_id: &str,
    ) -> Result<Option<(String, String)>, KmsError> {
        Ok(None)
    }
}

/// Resolves every subject of every namespace to a single master key.
pub struct StaticMasterKeyResolver {
    master_key_id: String,
}

impl StaticMasterKeyResolver {
    pub fn new(master_key_id: impl Into<String>) -> Self {
        Self {
            master_key_id: master_key_id.into(),
        }
    }
}

#[async_trait]
impl MasterKeyResolver for StaticMasterKeyResolver {
    async fn resolve(&self, _namespace: &str, _key_id: &str) -> Result<String, KmsError> {
        Ok(self.master_key_id.clone())
    }
}
