//! In-process key engine: bare store or cache wrapper over a durable one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::crypto::{Aes256KeyGenerator, Key, KeyGenerator, KeyMap};
use crate::engine::{
    KeyEngine, KeyEngineCache, KeyEngineConfig, KeyEngineWrapper, KeyState, KeySweeper,
};
use crate::error::KeyEngineError;

/// Default time-to-live of cached keys: 20 seconds.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(20);

struct CacheEntry {
    key: Key,
    state: KeyState,
    inserted_at: Instant,
    disabled_at: Option<Instant>,
}

impl CacheEntry {
    fn active(key: Key) -> Self {
        Self {
            key,
            state: KeyState::Active,
            inserted_at: Instant::now(),
            disabled_at: None,
        }
    }

    fn tombstone(&mut self) {
        self.state = KeyState::Deleted;
        self.key = Key::new(Vec::new());
        self.disabled_at = None;
    }
}

/// In-process, per-namespace key engine.
///
/// With an origin engine it is a read-through / write-through cache whose
/// entries expire after the configured TTL. Without one it acts as a bare
/// in-memory store implementing the full key lifecycle, including the
/// grace-period sweep.
pub struct InMemoryKeyEngine {
    origin: Option<Arc<dyn KeyEngine>>,
    cache: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
    ttl: Duration,
    grace_period: Duration,
    // Serializes get_or_create so concurrent callers observe one store trip.
    create_lock: Mutex<()>,
}

impl InMemoryKeyEngine {
    /// A bare in-memory engine with the default grace period.
    pub fn new() -> Self {
        Self::with_config(KeyEngineConfig::default())
    }

    /// A bare in-memory engine with an explicit configuration.
    pub fn with_config(config: KeyEngineConfig) -> Self {
        Self {
            origin: None,
            cache: RwLock::new(HashMap::new()),
            ttl: DEFAULT_CACHE_TTL,
            grace_period: config.grace_period,
            create_lock: Mutex::new(()),
        }
    }

    /// Wraps an existing engine with a cache layer. A zero TTL falls back
    /// to [`DEFAULT_CACHE_TTL`].
    pub fn wrap(origin: Arc<dyn KeyEngine>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl };
        Self {
            origin: Some(origin),
            cache: RwLock::new(HashMap::new()),
            ttl,
            grace_period: KeyEngineConfig::default().grace_period,
            create_lock: Mutex::new(()),
        }
    }

    fn cache_put_active(&self, namespace: &str, keys: &KeyMap) {
        let mut cache = self.cache.write();
        let entries = cache.entry(namespace.to_string()).or_default();
        for (id, key) in keys {
            entries.insert(id.clone(), CacheEntry::active(key.clone()));
        }
    }

    fn set_state(&self, namespace: &str, key_id: &str, state: KeyState) {
        let mut cache = self.cache.write();
        if let Some(entry) = cache
            .get_mut(namespace)
            .and_then(|entries| entries.get_mut(key_id))
        {
            match state {
                KeyState::Deleted => entry.tombstone(),
                KeyState::Active => {
                    entry.state = KeyState::Active;
                    entry.disabled_at = None;
                }
                KeyState::Disabled => {
                    entry.state = KeyState::Disabled;
                    if entry.disabled_at.is_none() {
                        entry.disabled_at = Some(Instant::now());
                    }
                }
            }
        }
    }
}

impl Default for InMemoryKeyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyEngine for InMemoryKeyEngine {
    async fn get_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
    ) -> Result<KeyMap, KeyEngineError> {
        let mut found = KeyMap::new();
        let mut missed = Vec::new();
        {
            let cache = self.cache.read();
            let entries = cache.get(namespace);
            for id in key_ids {
                match entries.and_then(|e| e.get(id)) {
                    Some(entry) if entry.state == KeyState::Active => {
                        found.insert(id.clone(), entry.key.clone());
                    }
                    _ => missed.push(id.clone()),
                }
            }
        }

        if let Some(origin) = &self.origin {
            if !missed.is_empty() {
                let keys = origin.get_keys(namespace, &missed).await?;
                self.cache_put_active(namespace, &keys);
                found.extend(keys);
            }
        }

        Ok(found)
    }

    async fn get_or_create_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
        key_gen: Option<Arc<dyn KeyGenerator>>,
    ) -> Result<KeyMap, KeyEngineError> {
        if let Some(origin) = &self.origin {
            let _guard = self.create_lock.lock().await;
            let keys = origin
                .get_or_create_keys(namespace, key_ids, key_gen)
                .await?;
            self.cache_put_active(namespace, &keys);
            return Ok(keys);
        }

        let key_gen =
            key_gen.unwrap_or_else(|| Arc::new(Aes256KeyGenerator) as Arc<dyn KeyGenerator>);

        let _guard = self.create_lock.lock().await;
        let mut keys = KeyMap::new();
        for id in key_ids {
            if keys.contains_key(id) {
                continue;
            }
            let existing = {
                let cache = self.cache.read();
                cache
                    .get(namespace)
                    .and_then(|entries| entries.get(id))
                    .map(|entry| (entry.state, entry.key.clone()))
            };
            match existing {
                Some((KeyState::Active, key)) => {
                    keys.insert(id.clone(), key);
                }
                // No fresh material for disabled or deleted subjects.
                Some(_) => {}
                None => {
                    let key = key_gen.generate(namespace, id).await?;
                    let mut cache = self.cache.write();
                    cache
                        .entry(namespace.to_string())
                        .or_default()
                        .insert(id.clone(), CacheEntry::active(key.clone()));
                    keys.insert(id.clone(), key);
                }
            }
        }
        Ok(keys)
    }

    async fn disable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        if let Some(origin) = &self.origin {
            origin.disable_key(namespace, key_id).await?;
            self.set_state(namespace, key_id, KeyState::Disabled);
            return Ok(());
        }

        let mut cache = self.cache.write();
        match cache
            .get_mut(namespace)
            .and_then(|entries| entries.get_mut(key_id))
        {
            None => Err(KeyEngineError::KeyNotFound),
            Some(entry) if entry.state == KeyState::Deleted => Err(KeyEngineError::KeyNotFound),
            Some(entry) => {
                entry.state = KeyState::Disabled;
                if entry.disabled_at.is_none() {
                    entry.disabled_at = Some(Instant::now());
                }
                Ok(())
            }
        }
    }

    async fn re_enable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        if let Some(origin) = &self.origin {
            origin.re_enable_key(namespace, key_id).await?;
            self.set_state(namespace, key_id, KeyState::Active);
            return Ok(());
        }

        let mut cache = self.cache.write();
        match cache
            .get_mut(namespace)
            .and_then(|entries| entries.get_mut(key_id))
        {
            None => Err(KeyEngineError::KeyNotFound),
            Some(entry) if entry.state == KeyState::Deleted => Err(KeyEngineError::KeyNotFound),
            Some(entry) => {
                entry.state = KeyState::Active;
                entry.disabled_at = None;
                Ok(())
            }
        }
    }

    async fn delete_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        if let Some(origin) = &self.origin {
            origin.delete_key(namespace, key_id).await?;
            self.set_state(namespace, key_id, KeyState::Deleted);
            return Ok(());
        }

        let mut cache = self.cache.write();
        if let Some(entry) = cache
            .get_mut(namespace)
            .and_then(|entries| entries.get_mut(key_id))
        {
            entry.tombstone();
        }
        Ok(())
    }

    fn as_cache(&self) -> Option<&dyn KeyEngineCache> {
        Some(self)
    }

    fn as_sweeper(&self) -> Option<&dyn KeySweeper> {
        match &self.origin {
            Some(origin) => origin.as_sweeper(),
            None => Some(self),
        }
    }
}

impl KeyEngineWrapper for InMemoryKeyEngine {
    fn origin(&self) -> Option<&dyn KeyEngine> {
        self.origin.as_deref()
    }
}

#[async_trait]
impl KeyEngineCache for InMemoryKeyEngine {
    async fn clear_cache(&self, namespace: &str, force: bool) -> Result<(), KeyEngineError> {
        // Standalone the engine IS the store; there is nothing to clear.
        if self.origin.is_none() {
            return Ok(());
        }

        let mut cache = self.cache.write();
        let Some(entries) = cache.get_mut(namespace) else {
            return Ok(());
        };
        if force {
            entries.clear();
        } else {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        }
        debug!(namespace, force, "cleared key cache");
        Ok(())
    }
}

#[async_trait]
impl KeySweeper for InMemoryKeyEngine {
    async fn delete_unused_keys(&self, namespace: &str) -> Result<(), KeyEngineError> {
        let mut cache = self.cache.write();
        let Some(entries) = cache.get_mut(namespace) else {
            return Ok(());
        };
        let grace = self.grace_period;
        let mut swept = 0usize;
        for entry in entries.values_mut() {
            if entry.state == KeyState::Disabled
                && entry
                    .disabled_at
                    .is_some_and(|at| at.elapsed() >= grace)
            {
                entry.tombstone();
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(namespace, swept, "swept unused keys");
        }
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, KeyEngineError> {
        Ok(self.cache.read().keys().cloned().collect())
    }
}
