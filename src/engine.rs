//! Key engine contract: the service responsible for managing per-subject
//! encryption keys.
//!
//! The minimum contract is [`KeyEngine`]. Wrappers (cache, KMS) implement
//! the same contract and forward only the capabilities they or their origin
//! support, discovered through [`KeyEngine::as_cache`],
//! [`KeyEngine::as_sweeper`] and [`KeyEngine::as_updater`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::crypto::{Key, KeyGenerator, KeyMap};
use crate::error::KeyEngineError;

/// Default grace period before disabled keys are swept: 7 days.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Encryption key lifecycle states.
///
/// A key starts `Active`, may bounce between `Active` and `Disabled`, and
/// ends `Deleted`. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Active,
    Disabled,
    Deleted,
}

impl KeyState {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyState::Active => "ACTIVE",
            KeyState::Disabled => "DISABLED",
            KeyState::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(KeyState::Active),
            "DISABLED" => Some(KeyState::Disabled),
            "DELETED" => Some(KeyState::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic configuration shared by key engine implementations.
#[derive(Debug, Clone)]
pub struct KeyEngineConfig {
    /// How long a disabled key survives before the sweep deletes it.
    pub grace_period: Duration,
}

impl Default for KeyEngineConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// The service responsible for managing encryption keys.
#[async_trait]
pub trait KeyEngine: Send + Sync {
    /// Returns the map of ACTIVE keys for the given subject IDs within the
    /// namespace. Disabled, deleted and missing subjects are silently
    /// omitted, so the result never has more entries than `key_ids`.
    async fn get_keys(&self, namespace: &str, key_ids: &[String])
        -> Result<KeyMap, KeyEngineError>;

    /// Returns the existing ACTIVE keys for the given subject IDs and mints
    /// fresh material for the unknown ones.
    ///
    /// A disabled or deleted subject never gets a new key.
    async fn get_or_create_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
        key_gen: Option<Arc<dyn KeyGenerator>>,
    ) -> Result<KeyMap, KeyEngineError>;

    /// Disables the subject's key. Idempotent; the first `disabled-at`
    /// stamp is preserved. Returns [`KeyEngineError::KeyNotFound`] if the
    /// key was already deleted.
    async fn disable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError>;

    /// Re-enables the subject's key. Idempotent. Returns
    /// [`KeyEngineError::KeyNotFound`] if the key was already deleted.
    async fn re_enable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError>;

    /// Forces the subject's key into the terminal DELETED state, erasing
    /// its material. Idempotent.
    async fn delete_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError>;

    /// Cache capability, when this engine (or a wrapper) provides one.
    fn as_cache(&self) -> Option<&dyn KeyEngineCache> {
        None
    }

    /// Sweep capability, when this engine provides one.
    fn as_sweeper(&self) -> Option<&dyn KeySweeper> {
        None
    }

    /// Material-update capability, when this engine provides one.
    fn as_updater(&self) -> Option<&dyn KeyUpdater> {
        None
    }
}

/// A wrapper on top of an existing key engine, overriding or enhancing
/// behaviors such as caching or client-side encryption of key material.
pub trait KeyEngineWrapper: KeyEngine {
    /// The wrapped engine, `None` when the wrapper is used standalone.
    fn origin(&self) -> Option<&dyn KeyEngine>;
}

/// Cache capability of a key engine wrapper.
#[async_trait]
pub trait KeyEngineCache: KeyEngineWrapper {
    /// Invalidates cached keys whose time-to-live has elapsed; `force`
    /// bypasses the TTL check and evicts everything.
    async fn clear_cache(&self, namespace: &str, force: bool) -> Result<(), KeyEngineError>;
}

/// Sweep capability: physical deletion of keys disabled for longer than the
/// grace period, plus the namespace enumeration sweep drivers need.
#[async_trait]
pub trait KeySweeper: Send + Sync {
    /// Deletes every key whose disabled window is older than the configured
    /// grace period.
    async fn delete_unused_keys(&self, namespace: &str) -> Result<(), KeyEngineError>;

    /// Every namespace ever observed by a get-or-create.
    async fn list_namespaces(&self) -> Result<Vec<String>, KeyEngineError>;
}

/// Material-update capability, used by envelope rotation to re-write stored
/// ciphertexts for subjects that are still ACTIVE.
#[async_trait]
pub trait KeyUpdater: Send + Sync {
    async fn update_keys(
        &self,
        namespace: &str,
        keys: Vec<(String, Key)>,
    ) -> Result<(), KeyEngineError>;
}
