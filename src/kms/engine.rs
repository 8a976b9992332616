//! Key engine wrapper delegating plaintext-key protection to a KMS.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::crypto::{namespace_aad, Key, KeyGenerator, KeyMap};
use crate::engine::{KeyEngine, KeyEngineWrapper, KeySweeper, KeyUpdater};
use crate::error::{KeyEngineError, KmsError};
use crate::kms::{KmsClient, MasterKeyResolver};

/// Default data-key size in bytes when no generator hints otherwise.
const DEFAULT_DATA_KEY_SIZE: usize = 32;

/// Envelope-encryption wrapper: the wrapped engine stores only data-key
/// ciphertexts; this wrapper owns the KMS round-trips that mint and decrypt
/// them.
///
/// A cache wrapper, if any, should be composed *above* this one so cache
/// hits avoid both the backing store and the KMS.
pub struct KmsKeyEngine {
    origin: Arc<dyn KeyEngine>,
    client: Arc<dyn KmsClient>,
    resolver: Arc<dyn MasterKeyResolver>,
}

/// Synthetic generator handed to the wrapped engine: mints data keys
/// remotely, stores the ciphertext, and retains the plaintext for the
/// caller's result map.
struct KmsDataKeyGenerator {
    client: Arc<dyn KmsClient>,
    resolver: Arc<dyn MasterKeyResolver>,
    num_bytes: usize,
    minted: Mutex<HashMap<String, (Vec<u8>, Key)>>,
}

#[async_trait]
impl KeyGenerator for KmsDataKeyGenerator {
    async fn generate(&self, namespace: &str, key_id: &str) -> Result<Key, KeyEngineError> {
        let master = self
            .resolver
            .resolve(namespace, key_id)
            .await
            .map_err(|e| KeyEngineError::Persist(e.to_string()))?;
        let aad = namespace_aad(namespace);
        let data_key = self
            .client
            .generate_data_key(&master, self.num_bytes, &aad)
            .await
            .map_err(|e| KeyEngineError::Persist(e.to_string()))?;

        self.minted.lock().insert(
            key_id.to_string(),
            (data_key.ciphertext.clone(), data_key.plaintext),
        );
        Ok(Key::new(data_key.ciphertext))
    }
}

impl KmsKeyEngine {
    pub fn new(
        client: Arc<dyn KmsClient>,
        resolver: Arc<dyn MasterKeyResolver>,
        origin: Arc<dyn KeyEngine>,
    ) -> Self {
        Self {
            origin,
            client,
            resolver,
        }
    }

    async fn decrypt_data_key(
        &self,
        namespace: &str,
        key_id: &str,
        encrypted: &Key,
        aad: &[u8],
    ) -> Result<Key, KmsError> {
        let master = self.resolver.resolve(namespace, key_id).await?;
        self.client.decrypt(&master, encrypted.as_bytes(), aad).await
    }

    /// Probes the caller's generator for the data-key size the KMS should
    /// mint: 16, 32 or 64 bytes, defaulting to 32 when no generator is
    /// supplied or the dry run fails.
    async fn probe_key_size(
        &self,
        namespace: &str,
        key_gen: &Option<Arc<dyn KeyGenerator>>,
    ) -> Result<usize, KeyEngineError> {
        let Some(key_gen) = key_gen else {
            return Ok(DEFAULT_DATA_KEY_SIZE);
        };
        match key_gen.generate(namespace, "tmpKeyID").await {
            Ok(key) => match key.len() {
                len @ (16 | 32 | 64) => Ok(len),
                len => Err(KeyEngineError::Persist(
                    KmsError::IncompatibleKeyLength(len).to_string(),
                )),
            },
            Err(_) => Ok(DEFAULT_DATA_KEY_SIZE),
        }
    }

    /// Re-encrypts stored data keys whose resolver reports a pending master
    /// rotation, writing the new ciphertexts back through the origin's
    /// update capability.
    pub async fn rotate_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
    ) -> Result<(), KeyEngineError> {
        let encrypted = self.origin.get_keys(namespace, key_ids).await?;
        let aad = namespace_aad(namespace);

        let mut updated = Vec::new();
        for (key_id, key) in &encrypted {
            let pending = self
                .resolver
                .pending_rotation(namespace, key_id)
                .await
                .map_err(|e| KeyEngineError::Persist(e.to_string()))?;
            if let Some((old_master, new_master)) = pending {
                let rewrapped = self
                    .client
                    .re_encrypt(key.as_bytes(), &old_master, &new_master, &aad)
                    .await
                    .map_err(|e| KeyEngineError::Persist(e.to_string()))?;
                updated.push((key_id.clone(), Key::new(rewrapped)));
            }
        }

        if updated.is_empty() {
            return Ok(());
        }
        debug!(namespace, count = updated.len(), "rotating envelope-encrypted keys");
        match self.origin.as_updater() {
            Some(updater) => updater.update_keys(namespace, updated).await,
            None => Err(KeyEngineError::Persist(
                "origin engine does not support material updates".to_string(),
            )),
        }
    }
}

#[async_trait]
impl KeyEngine for KmsKeyEngine {
    async fn get_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
    ) -> Result<KeyMap, KeyEngineError> {
        let encrypted = self.origin.get_keys(namespace, key_ids).await?;
        let aad = namespace_aad(namespace);

        let mut keys = KeyMap::new();
        for (key_id, key) in &encrypted {
            let plaintext = self
                .decrypt_data_key(namespace, key_id, key, &aad)
                .await
                .map_err(|e| {
                    warn!(namespace, key_id = %key_id, "KMS decrypt failed");
                    KeyEngineError::Get(e.to_string())
                })?;
            keys.insert(key_id.clone(), plaintext);
        }
        Ok(keys)
    }

    async fn get_or_create_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
        key_gen: Option<Arc<dyn KeyGenerator>>,
    ) -> Result<KeyMap, KeyEngineError> {
        let num_bytes = self.probe_key_size(namespace, &key_gen).await?;
        let generator = Arc::new(KmsDataKeyGenerator {
            client: self.client.clone(),
            resolver: self.resolver.clone(),
            num_bytes,
            minted: Mutex::new(HashMap::new()),
        });

        let encrypted = self
            .origin
            .get_or_create_keys(
                namespace,
                key_ids,
                Some(generator.clone() as Arc<dyn KeyGenerator>),
            )
            .await?;

        let minted = std::mem::take(&mut *generator.minted.lock());
        let aad = namespace_aad(namespace);

        let mut keys = KeyMap::new();
        for (key_id, key) in &encrypted {
            // The locally minted plaintext only stands when its ciphertext
            // actually won the conditional create; a lost race means the
            // store returned another writer's ciphertext.
            let fresh = match minted.get(key_id) {
                Some((ciphertext, plaintext)) if ciphertext.as_slice() == key.as_bytes() => {
                    Some(plaintext.clone())
                }
                _ => None,
            };
            let plaintext = match fresh {
                Some(plaintext) => plaintext,
                None => self
                    .decrypt_data_key(namespace, key_id, key, &aad)
                    .await
                    .map_err(|e| KeyEngineError::Get(e.to_string()))?,
            };
            keys.insert(key_id.clone(), plaintext);
        }
        Ok(keys)
    }

    async fn disable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        self.origin.disable_key(namespace, key_id).await
    }

    async fn re_enable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        self.origin.re_enable_key(namespace, key_id).await
    }

    async fn delete_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        self.origin.delete_key(namespace, key_id).await
    }

    fn as_sweeper(&self) -> Option<&dyn KeySweeper> {
        self.origin.as_sweeper()
    }

    fn as_updater(&self) -> Option<&dyn KeyUpdater> {
        self.origin.as_updater()
    }
}

impl KeyEngineWrapper for KmsKeyEngine {
    fn origin(&self) -> Option<&dyn KeyEngine> {
        Some(self.origin.as_ref())
    }
}
