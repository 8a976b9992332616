//! In-process KMS holding AES-256-GCM master keys.
//!
//! Master keys never leave this type; callers only see data-key plaintexts
//! and ciphertexts, the same surface a remote KMS exposes. Intended for
//! development and tests.

use std::collections::HashMap;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::RngCore;

use crate::crypto::{Key, AES_256_KEY_SIZE, NONCE_SIZE};
use crate::error::KmsError;
use crate::kms::{DataKey, KmsClient};

/// In-memory master-key registry implementing [`KmsClient`].
pub struct LocalKms {
    masters: RwLock<HashMap<String, Key>>,
}

impl LocalKms {
    pub fn new() -> Self {
        Self {
            masters: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a fresh random master key under the given id; keeps the
    /// existing key when the id is already registered.
    pub fn add_master_key(&self, master_key_id: impl Into<String>) {
        let mut masters = self.masters.write();
        masters
            .entry(master_key_id.into())
            .or_insert_with(|| Key::generate(AES_256_KEY_SIZE));
    }

    fn master(&self, master_key_id: &str) -> Result<Key, KmsError> {
        self.masters
            .read()
            .get(master_key_id)
            .cloned()
            .ok_or_else(|| KmsError::Resolver(format!("unknown master key: {master_key_id}")))
    }

    fn seal(master: &Key, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        let cipher = Aes256Gcm::new_from_slice(master.as_bytes())
            .map_err(|e| KmsError::Generate(e.to_string()))?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| KmsError::Generate(e.to_string()))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(master: &Key, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(KmsError::Decrypt("ciphertext too short".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(master.as_bytes())
            .map_err(|e| KmsError::Decrypt(e.to_string()))?;
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, Payload { msg: sealed, aad })
            .map_err(|_| KmsError::Decrypt("authentication error".to_string()))
    }
}

impl Default for LocalKms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KmsClient for LocalKms {
    async fn generate_data_key(
        &self,
        master_key_id: &str,
        num_bytes: usize,
        aad: &[u8],
    ) -> Result<DataKey, KmsError> {
        let master = self.master(master_key_id)?;
        let plaintext = Key::generate(num_bytes);
        let ciphertext = Self::seal(&master, plaintext.as_bytes(), aad)?;
        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    async fn decrypt(
        &self,
        master_key_id: &str,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Key, KmsError> {
        let master = self.master(master_key_id)?;
        Ok(Key::new(Self::open(&master, ciphertext, aad)?))
    }

    async fn re_encrypt(
        &self,
        ciphertext: &[u8],
        source_master_id: &str,
        dest_master_id: &str,
        aad: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        let source = self.master(source_master_id)?;
        let dest = self.master(dest_master_id)?;
        let plaintext = Self::open(&source, ciphertext, aad)
            .map_err(|e| KmsError::ReEncrypt(e.to_string()))?;
        Self::seal(&dest, &plaintext, aad).map_err(|e| KmsError::ReEncrypt(e.to_string()))
    }
}
