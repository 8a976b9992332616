//! The Protector: encrypt, decrypt, forget, recover and cache-clear
//! orchestration over tagged records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::crypto::{Aes256GcmEncrypter, Encrypter};
use crate::engine::KeyEngine;
use crate::error::{Error, ErrorKind, KeyEngineError, TokenError};
use crate::memory::{InMemoryKeyEngine, DEFAULT_CACHE_TTL};
use crate::record::{resolve_subject, PiiRecord};
use crate::token::{TokenData, TokenEngine, TokenValueMap, TokenizeConfig, ValueTokenMap};
use crate::wire;

/// Configuration of a Protector service.
pub struct ProtectorConfig {
    /// Encryption algorithm; AES-256-GCM by default.
    pub encrypter: Arc<dyn Encrypter>,
    /// Wrap the engine with an in-process key cache when it has none.
    pub cache_enabled: bool,
    /// Time-to-live of cached keys.
    pub cache_ttl: Duration,
    /// Forget by disabling (recoverable during the grace period) instead
    /// of deleting immediately.
    pub graceful_mode: bool,
    /// Optional tokenisation surface.
    pub token_engine: Option<Arc<dyn TokenEngine>>,
}

impl Default for ProtectorConfig {
    fn default() -> Self {
        Self {
            encrypter: Arc::new(Aes256GcmEncrypter::new()),
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            graceful_mode: true,
            token_engine: None,
        }
    }
}

/// Encrypts, decrypts and crypto-erases subjects' personal data.
#[async_trait]
pub trait Protector: Send + Sync {
    fn namespace(&self) -> &str;

    /// Encrypts the PII fields of the given records. Idempotent: fields
    /// already in wire format are left untouched.
    async fn encrypt(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error>;

    /// Decrypts the PII fields of the given records. Fields of forgotten
    /// subjects are replaced with their configured replacement message;
    /// fields not in wire format are left alone.
    async fn decrypt(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error>;

    /// Removes the subject's encryption material, crypto-erasing its data:
    /// gracefully (disable, recoverable within the grace period) or
    /// immediately, per configuration.
    async fn forget(&self, subject_id: &str) -> Result<(), Error>;

    /// Restores a gracefully forgotten subject. Fails with
    /// `cannot-recover-subject` once the grace period has closed.
    async fn recover(&self, subject_id: &str) -> Result<(), Error>;

    /// Clears the engine's key cache, if the engine has one.
    async fn clear(&self, force: bool) -> Result<(), Error>;
}

/// The standard [`Protector`] implementation.
pub struct SubjectProtector {
    namespace: String,
    engine: Arc<dyn KeyEngine>,
    encrypter: Arc<dyn Encrypter>,
    graceful_mode: bool,
    token_engine: Option<Arc<dyn TokenEngine>>,
}

impl SubjectProtector {
    /// Builds a protector with the default configuration. An empty
    /// namespace falls back to `default`.
    pub fn new(namespace: &str, engine: Arc<dyn KeyEngine>) -> Self {
        Self::with_config(namespace, engine, ProtectorConfig::default())
    }

    pub fn with_config(
        namespace: &str,
        engine: Arc<dyn KeyEngine>,
        config: ProtectorConfig,
    ) -> Self {
        let namespace = if namespace.is_empty() {
            "default".to_string()
        } else {
            namespace.to_string()
        };

        let engine = if config.cache_enabled && engine.as_cache().is_none() {
            Arc::new(InMemoryKeyEngine::wrap(engine, config.cache_ttl)) as Arc<dyn KeyEngine>
        } else {
            engine
        };

        Self {
            namespace,
            engine,
            encrypter: config.encrypter,
            graceful_mode: config.graceful_mode,
            token_engine: config.token_engine,
        }
    }

    /// The key engine in use (after any cache wrapping).
    pub fn engine(&self) -> &Arc<dyn KeyEngine> {
        &self.engine
    }

    fn scan(records: &[&mut dyn PiiRecord]) -> Result<Vec<(usize, String)>, Error> {
        let mut scanned = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if !record.descriptor().has_pii() {
                continue;
            }
            let subject_id = resolve_subject(&**record)?;
            scanned.push((index, subject_id));
        }
        Ok(scanned)
    }

    fn subject_ids(scanned: &[(usize, String)]) -> Vec<String> {
        let mut ids: Vec<String> = scanned.iter().map(|(_, id)| id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    async fn encrypt_records(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error> {
        let scanned = Self::scan(records)?;
        if scanned.is_empty() {
            return Ok(());
        }
        let ids = Self::subject_ids(&scanned);

        let keys = self
            .engine
            .get_or_create_keys(&self.namespace, &ids, Some(self.encrypter.key_generator()))
            .await
            .map_err(Error::from)?;

        let namespace = self.namespace.as_str();
        let encrypter = self.encrypter.as_ref();
        for (index, subject_id) in &scanned {
            records[*index].rewrite(subject_id, &mut |field, value| {
                // Packed implies already encrypted; encrypting twice would
                // bury the original under a second envelope.
                if wire::is_wire_formatted(value) {
                    return Ok(None);
                }
                let key = keys.get(field.subject_id).ok_or_else(|| {
                    Error::new(ErrorKind::SubjectForgotten).with_subject(field.subject_id)
                })?;
                let ciphertext = encrypter
                    .encrypt(namespace, key, value)
                    .map_err(Error::from)?;
                Ok(Some(wire::format_value(
                    field.subject_id,
                    &ciphertext,
                    wire::WIRE_VERSION,
                )))
            })?;
        }
        Ok(())
    }

    async fn decrypt_records(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error> {
        let scanned = Self::scan(records)?;
        if scanned.is_empty() {
            return Ok(());
        }

        // The subject ID on the record is an encryption-time assertion; the
        // one embedded in each ciphertext is the decryption-time ground
        // truth, and a record may carry PII of several subjects.
        let mut embedded: Vec<String> = Vec::new();
        for (index, subject_id) in &scanned {
            records[*index].rewrite(subject_id, &mut |_, value| {
                if wire::is_wire_formatted(value) {
                    if let Ok((_, subject, _)) = wire::parse_value(value) {
                        embedded.push(subject);
                    }
                }
                Ok(None)
            })?;
        }
        embedded.sort();
        embedded.dedup();

        let keys = self
            .engine
            .get_keys(&self.namespace, &embedded)
            .await
            .map_err(Error::from)?;

        let namespace = self.namespace.as_str();
        let encrypter = self.encrypter.as_ref();
        for (index, subject_id) in &scanned {
            records[*index].rewrite(subject_id, &mut |field, value| {
                if !wire::is_wire_formatted(value) {
                    return Ok(None);
                }
                let (version, subject, ciphertext) =
                    wire::parse_value(value).map_err(Error::from)?;
                if version != wire::WIRE_VERSION {
                    return Err(crate::error::WireFormatError::UnsupportedVersion(version).into());
                }
                match keys.get(&subject) {
                    None => Ok(Some(field.replacement.to_string())),
                    Some(key) => {
                        let plaintext = encrypter
                            .decrypt(namespace, key, &ciphertext)
                            .map_err(Error::from)?;
                        Ok(Some(plaintext))
                    }
                }
            })?;
        }
        Ok(())
    }

    /// Maps values to tokens through the configured token engine.
    pub async fn tokenize(
        &self,
        namespace: &str,
        values: &[TokenData],
        config: TokenizeConfig,
    ) -> Result<ValueTokenMap, Error> {
        let engine = self.token_engine()?;
        engine
            .tokenize(namespace, values, config)
            .await
            .map_err(Error::from)
    }

    /// Maps tokens back to values through the configured token engine.
    pub async fn detokenize(
        &self,
        namespace: &str,
        tokens: &[String],
    ) -> Result<TokenValueMap, Error> {
        let engine = self.token_engine()?;
        engine
            .detokenize(namespace, tokens)
            .await
            .map_err(Error::from)
    }

    /// Deletes a token through the configured token engine.
    pub async fn delete_token(&self, namespace: &str, token: &str) -> Result<(), Error> {
        let engine = self.token_engine()?;
        engine
            .delete_token(namespace, token)
            .await
            .map_err(Error::from)
    }

    fn token_engine(&self) -> Result<&Arc<dyn TokenEngine>, Error> {
        self.token_engine.as_ref().ok_or_else(|| {
            Error::from(TokenError::Tokenize(
                "token engine not configured".to_string(),
            ))
        })
    }
}

#[async_trait]
impl Protector for SubjectProtector {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn encrypt(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error> {
        self.encrypt_records(records).await.map_err(|e| {
            Error::new(ErrorKind::EncryptDecryptFailure)
                .with_source(e)
                .with_namespace(&self.namespace)
        })
    }

    async fn decrypt(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error> {
        self.decrypt_records(records).await.map_err(|e| {
            Error::new(ErrorKind::EncryptDecryptFailure)
                .with_source(e)
                .with_namespace(&self.namespace)
        })
    }

    async fn forget(&self, subject_id: &str) -> Result<(), Error> {
        debug!(namespace = %self.namespace, graceful = self.graceful_mode, "forgetting subject");
        let result = if self.graceful_mode {
            self.engine.disable_key(&self.namespace, subject_id).await
        } else {
            self.engine.delete_key(&self.namespace, subject_id).await
        };
        result.map_err(|e| {
            Error::new(ErrorKind::ForgetSubjectFailure)
                .with_source(Error::from(e))
                .with_namespace(&self.namespace)
                .with_subject(subject_id)
        })
    }

    async fn recover(&self, subject_id: &str) -> Result<(), Error> {
        match self.engine.re_enable_key(&self.namespace, subject_id).await {
            Ok(()) => Ok(()),
            Err(KeyEngineError::KeyNotFound) => Err(Error::new(ErrorKind::CannotRecoverSubject)
                .with_source(Error::from(KeyEngineError::KeyNotFound))
                .with_namespace(&self.namespace)
                .with_subject(subject_id)),
            Err(e) => Err(Error::new(ErrorKind::RecoverSubjectFailure)
                .with_source(Error::from(e))
                .with_namespace(&self.namespace)
                .with_subject(subject_id)),
        }
    }

    async fn clear(&self, force: bool) -> Result<(), Error> {
        if let Some(cache) = self.engine.as_cache() {
            cache
                .clear_cache(&self.namespace, force)
                .await
                .map_err(|e| {
                    Error::new(ErrorKind::ClearCacheFailure)
                        .with_source(Error::from(e))
                        .with_namespace(&self.namespace)
                })?;
        }
        Ok(())
    }
}
