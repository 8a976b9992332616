//! In-process token engine: bare store or cache wrapper over a durable one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::TokenError;
use crate::memory::DEFAULT_CACHE_TTL;
use crate::token::{
    TokenData, TokenEngine, TokenEngineCache, TokenRecord, TokenValueMap, TokenizeConfig,
    ValueTokenMap,
};

struct TokenCacheEntry {
    record: TokenRecord,
    at: Instant,
}

/// Both direction maps reference the same entry, so evicting through either
/// direction drops both.
#[derive(Default)]
struct TokenCache {
    token_to_value: HashMap<String, Arc<TokenCacheEntry>>,
    value_to_token: HashMap<TokenData, Arc<TokenCacheEntry>>,
}

impl TokenCache {
    fn add(&mut self, record: TokenRecord) {
        let entry = Arc::new(TokenCacheEntry {
            record: record.clone(),
            at: Instant::now(),
        });
        self.token_to_value.insert(record.token, entry.clone());
        self.value_to_token.insert(entry.record.value.clone(), entry);
    }

    fn delete(&mut self, token: &str) {
        if let Some(entry) = self.token_to_value.remove(token) {
            self.value_to_token.remove(&entry.record.value);
        }
    }

    fn clear(&mut self, ttl: Duration, force: bool) {
        let expired: Vec<String> = self
            .token_to_value
            .iter()
            .filter(|(_, entry)| force || entry.at.elapsed() >= ttl)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            self.delete(&token);
        }
    }
}

/// In-process, per-namespace token engine.
///
/// With an origin engine it is a read-through cache of tokenisation results
/// in both directions; without one it acts as a bare in-memory token store.
pub struct InMemoryTokenEngine {
    origin: Option<Arc<dyn TokenEngine>>,
    caches: RwLock<HashMap<String, TokenCache>>,
    ttl: Duration,
}

impl InMemoryTokenEngine {
    /// A bare in-memory token engine.
    pub fn new() -> Self {
        Self {
            origin: None,
            caches: RwLock::new(HashMap::new()),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Wraps an existing engine with a cache layer. A zero TTL falls back
    /// to [`DEFAULT_CACHE_TTL`].
    pub fn wrap(origin: Arc<dyn TokenEngine>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl };
        Self {
            origin: Some(origin),
            caches: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for InMemoryTokenEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenEngine for InMemoryTokenEngine {
    async fn tokenize(
        &self,
        namespace: &str,
        values: &[TokenData],
        config: TokenizeConfig,
    ) -> Result<ValueTokenMap, TokenError> {
        let mut found = ValueTokenMap::new();
        let mut missed = Vec::new();
        {
            let caches = self.caches.read();
            let cache = caches.get(namespace);
            for value in values {
                match cache.and_then(|c| c.value_to_token.get(value)) {
                    Some(entry) => {
                        found.insert(value.clone(), entry.record.clone());
                    }
                    None => missed.push(value.clone()),
                }
            }
        }
        if missed.is_empty() {
            return Ok(found);
        }

        match &self.origin {
            Some(origin) => {
                let records = origin.tokenize(namespace, &missed, config).await?;
                let mut caches = self.caches.write();
                let cache = caches.entry(namespace.to_string()).or_default();
                for record in records.values() {
                    cache.add(record.clone());
                    found.insert(record.value.clone(), record.clone());
                }
            }
            None => {
                let token_gen = config.token_gen.ok_or(TokenError::GenFuncNotFound)?;
                for value in missed {
                    let token = token_gen.generate(namespace, &value).await?;
                    let record = TokenRecord {
                        token,
                        value: value.clone(),
                    };
                    let mut caches = self.caches.write();
                    caches
                        .entry(namespace.to_string())
                        .or_default()
                        .add(record.clone());
                    found.insert(value, record);
                }
            }
        }

        Ok(found)
    }

    async fn detokenize(
        &self,
        namespace: &str,
        tokens: &[String],
    ) -> Result<TokenValueMap, TokenError> {
        let mut found = TokenValueMap::new();
        let mut missed = Vec::new();
        {
            let caches = self.caches.read();
            let cache = caches.get(namespace);
            for token in tokens {
                match cache.and_then(|c| c.token_to_value.get(token)) {
                    Some(entry) => {
                        found.insert(token.clone(), entry.record.clone());
                    }
                    None => missed.push(token.clone()),
                }
            }
        }

        if let Some(origin) = &self.origin {
            if !missed.is_empty() {
                let records = origin.detokenize(namespace, &missed).await?;
                let mut caches = self.caches.write();
                let cache = caches.entry(namespace.to_string()).or_default();
                for record in records.values() {
                    cache.add(record.clone());
                    found.insert(record.token.clone(), record.clone());
                }
            }
        }

        Ok(found)
    }

    async fn delete_token(&self, namespace: &str, token: &str) -> Result<(), TokenError> {
        if let Some(origin) = &self.origin {
            origin.delete_token(namespace, token).await?;
        }
        let mut caches = self.caches.write();
        if let Some(cache) = caches.get_mut(namespace) {
            cache.delete(token);
        }
        Ok(())
    }

    fn as_cache(&self) -> Option<&dyn TokenEngineCache> {
        Some(self)
    }
}

#[async_trait]
impl TokenEngineCache for InMemoryTokenEngine {
    async fn clear_cache(&self, namespace: &str, force: bool) -> Result<(), TokenError> {
        let mut caches = self.caches.write();
        if let Some(cache) = caches.get_mut(namespace) {
            cache.clear(self.ttl, force);
            debug!(namespace, force, "cleared token cache");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::token_data_slice;

    #[tokio::test]
    async fn test_tokenize_is_stable_per_value() {
        let engine = InMemoryTokenEngine::new();
        let values = token_data_slice(["alice@example.com"]);

        let first = engine
            .tokenize("ns", &values, TokenizeConfig::default())
            .await
            .unwrap();
        let second = engine
            .tokenize("ns", &values, TokenizeConfig::default())
            .await
            .unwrap();

        assert_eq!(
            first.get(&values[0]).unwrap().token,
            second.get(&values[0]).unwrap().token
        );
    }

    #[tokio::test]
    async fn test_detokenize_roundtrip_and_silent_omission() {
        let engine = InMemoryTokenEngine::new();
        let values = token_data_slice(["a", "b"]);
        let records = engine
            .tokenize("ns", &values, TokenizeConfig::default())
            .await
            .unwrap();

        let mut tokens: Vec<String> = records.values().map(|r| r.token.clone()).collect();
        tokens.push("unknown-token".to_string());

        let resolved = engine.detokenize("ns", &tokens).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(!resolved.contains_key("unknown-token"));
    }

    #[tokio::test]
    async fn test_missing_generator_fails() {
        let engine = InMemoryTokenEngine::new();
        let values = token_data_slice(["v"]);
        let result = engine
            .tokenize("ns", &values, TokenizeConfig { token_gen: None })
            .await;
        assert!(matches!(result, Err(TokenError::GenFuncNotFound)));
    }

    #[tokio::test]
    async fn test_delete_token_evicts_both_directions() {
        let engine = InMemoryTokenEngine::new();
        let values = token_data_slice(["v"]);
        let records = engine
            .tokenize("ns", &values, TokenizeConfig::default())
            .await
            .unwrap();
        let token = records.get(&values[0]).unwrap().token.clone();

        engine.delete_token("ns", &token).await.unwrap();

        let resolved = engine.detokenize("ns", &[token]).await.unwrap();
        assert!(resolved.is_empty());
        // A new tokenize mints a fresh token, proving the value side was
        // evicted too.
        let again = engine
            .tokenize("ns", &values, TokenizeConfig::default())
            .await
            .unwrap();
        assert_ne!(
            again.get(&values[0]).unwrap().token,
            records.get(&values[0]).unwrap().token
        );
    }

    #[tokio::test]
    async fn test_clear_cache_force_and_ttl() {
        let origin = Arc::new(InMemoryTokenEngine::new());
        let cache = InMemoryTokenEngine::wrap(origin.clone(), Duration::from_secs(60));

        let values = token_data_slice(["v"]);
        let records = cache
            .tokenize("ns", &values, TokenizeConfig::default())
            .await
            .unwrap();
        let token = records.get(&values[0]).unwrap().token.clone();

        cache.clear_cache("ns", true).await.unwrap();

        // Origin still resolves it; cache refills transparently.
        let resolved = cache.detokenize("ns", &[token.clone()]).await.unwrap();
        assert_eq!(resolved.get(&token).unwrap().value, values[0]);
    }
}
