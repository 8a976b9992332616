//! Durable key engine over a [`StoreClient`].
//!
//! One item per `(namespace, subject)`. The secondary sort attribute
//! `_lsik` is the work-horse: `enabled@<subjectID>` lets a single range
//! read return all active keys for a sorted set of subjects, and
//! `disabled@<unix-seconds>` lets the sweep range-scan everything disabled
//! before the grace cutoff without a full table scan. Deleted items carry
//! no `_lsik`, so neither query can ever resurface them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::crypto::{Aes256KeyGenerator, Key, KeyGenerator, KeyMap};
use crate::engine::{KeyEngine, KeyEngineConfig, KeyState, KeySweeper, KeyUpdater};
use crate::error::{KeyEngineError, StoreError};
use crate::store::{
    doc_b, doc_s, now_secs, Condition, Document, QueryIndex, RangeQuery, StoreClient, Update,
    Value, ATTR_AT, ATTR_CREATED_AT, ATTR_DELETED_AT, ATTR_DISABLED_AT, ATTR_ENABLED_AT,
    ATTR_KEY, ATTR_KEY_ID, ATTR_LSIK, ATTR_NAMESPACE, ATTR_PK, ATTR_SK, ATTR_STATE, NS_PARTITION,
};

fn key_sort(key_id: &str) -> String {
    format!("key#{key_id}")
}

fn enabled_token(key_id: &str) -> String {
    format!("enabled@{key_id}")
}

fn disabled_token(secs: i64) -> String {
    format!("disabled@{secs}")
}

/// Registers a namespace in the registry partition; idempotent.
pub(crate) async fn register_namespace<C: StoreClient>(
    client: &C,
    namespace: &str,
) -> Result<(), StoreError> {
    let mut item = Document::new();
    item.insert(ATTR_PK.to_string(), Value::S(NS_PARTITION.to_string()));
    item.insert(ATTR_SK.to_string(), Value::S(namespace.to_string()));
    item.insert(ATTR_NAMESPACE.to_string(), Value::S(namespace.to_string()));
    item.insert(ATTR_AT.to_string(), Value::N(now_secs()));

    match client.put_item(item, Condition::NotExists).await {
        Ok(()) | Err(StoreError::ConditionFailed) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Lists every namespace ever registered.
pub(crate) async fn list_registered_namespaces<C: StoreClient>(
    client: &C,
) -> Result<Vec<String>, StoreError> {
    let docs = client
        .query(RangeQuery {
            partition: NS_PARTITION.to_string(),
            index: QueryIndex::SortKey,
            range: None,
            filter_in: None,
        })
        .await?;
    Ok(docs
        .iter()
        .filter_map(|doc| doc_s(doc, ATTR_NAMESPACE).map(str::to_string))
        .collect())
}

/// Key engine persisting key records in a conditional-write document store.
pub struct StoreKeyEngine<C: StoreClient> {
    client: Arc<C>,
    config: KeyEngineConfig,
}

impl<C: StoreClient> StoreKeyEngine<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self::with_config(client, KeyEngineConfig::default())
    }

    pub fn with_config(client: Arc<C>, config: KeyEngineConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Conditional create of one ACTIVE key record; when the record already
    /// exists, reads back its material if (and only if) it is still ACTIVE.
    /// Returns `None` for subjects whose record is disabled or deleted.
    async fn create_key(
        &self,
        namespace: &str,
        key_id: &str,
        key: Key,
    ) -> Result<Option<Key>, KeyEngineError> {
        let now = now_secs();
        let mut item = Document::new();
        item.insert(ATTR_PK.to_string(), Value::S(namespace.to_string()));
        item.insert(ATTR_SK.to_string(), Value::S(key_sort(key_id)));
        item.insert(ATTR_LSIK.to_string(), Value::S(enabled_token(key_id)));
        item.insert(ATTR_NAMESPACE.to_string(), Value::S(namespace.to_string()));
        item.insert(ATTR_KEY_ID.to_string(), Value::S(key_id.to_string()));
        item.insert(ATTR_KEY.to_string(), Value::B(key.as_bytes().to_vec()));
        item.insert(
            ATTR_STATE.to_string(),
            Value::S(KeyState::Active.as_str().to_string()),
        );
        item.insert(ATTR_CREATED_AT.to_string(), Value::N(now));
        item.insert(ATTR_ENABLED_AT.to_string(), Value::N(now));

        match self.client.put_item(item, Condition::NotExists).await {
            Ok(()) => return Ok(Some(key)),
            Err(StoreError::ConditionFailed) => {}
            Err(e) => return Err(KeyEngineError::Persist(e.to_string())),
        }

        // Lost the create race, or the subject already has a record. A
        // no-op update conditioned on ACTIVE reads the existing material
        // without a second round-trip when the condition holds.
        let update = Update {
            set_if_not_exists: vec![(ATTR_KEY, Value::Null)],
            ..Update::default()
        };
        let condition = Condition::Equals(
            ATTR_STATE,
            Value::S(KeyState::Active.as_str().to_string()),
        );
        match self
            .client
            .update_item(namespace, &key_sort(key_id), update, condition)
            .await
        {
            Ok(updated) => Ok(updated
                .get(ATTR_KEY)
                .and_then(Value::as_b)
                .map(|bytes| Key::new(bytes.to_vec()))),
            Err(StoreError::ConditionFailed) => Ok(None),
            Err(e) => Err(KeyEngineError::Persist(e.to_string())),
        }
    }
}

#[async_trait]
impl<C: StoreClient + 'static> KeyEngine for StoreKeyEngine<C> {
    async fn get_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
    ) -> Result<KeyMap, KeyEngineError> {
        let mut keys = KeyMap::new();
        if key_ids.is_empty() {
            return Ok(keys);
        }

        let mut sorted = key_ids.to_vec();
        sorted.sort();
        sorted.dedup();

        // One ranged read over the enabled@ token space, bounded by the
        // sorted extremes, regardless of how many subjects are requested.
        let docs = self
            .client
            .query(RangeQuery {
                partition: namespace.to_string(),
                index: QueryIndex::Secondary,
                range: Some((
                    enabled_token(&sorted[0]),
                    enabled_token(&sorted[sorted.len() - 1]),
                )),
                filter_in: Some((
                    ATTR_KEY_ID,
                    sorted.iter().map(|id| Value::S(id.clone())).collect(),
                )),
            })
            .await
            .map_err(|e| KeyEngineError::Get(e.to_string()))?;

        for doc in &docs {
            if let (Some(id), Some(bytes)) = (doc_s(doc, ATTR_KEY_ID), doc_b(doc, ATTR_KEY)) {
                keys.insert(id.to_string(), Key::new(bytes.to_vec()));
            }
        }
        Ok(keys)
    }

    async fn get_or_create_keys(
        &self,
        namespace: &str,
        key_ids: &[String],
        key_gen: Option<Arc<dyn KeyGenerator>>,
    ) -> Result<KeyMap, KeyEngineError> {
        let key_gen =
            key_gen.unwrap_or_else(|| Arc::new(Aes256KeyGenerator) as Arc<dyn KeyGenerator>);

        let mut keys = self.get_keys(namespace, key_ids).await?;

        // First sight of a namespace is the only time this write is not a
        // conditional no-op.
        if keys.is_empty() {
            register_namespace(self.client.as_ref(), namespace)
                .await
                .map_err(|e| KeyEngineError::Persist(e.to_string()))?;
        }

        for key_id in key_ids {
            if keys.contains_key(key_id) {
                continue;
            }
            let fresh = key_gen.generate(namespace, key_id).await?;
            if let Some(key) = self.create_key(namespace, key_id, fresh).await? {
                keys.insert(key_id.clone(), key);
            } else {
                debug!(namespace, key_id = %key_id, "subject is disabled or deleted, no key minted");
            }
        }
        Ok(keys)
    }

    async fn disable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        let now = now_secs();
        let update = Update {
            set: vec![
                (
                    ATTR_STATE,
                    Value::S(KeyState::Disabled.as_str().to_string()),
                ),
                (ATTR_LSIK, Value::S(disabled_token(now))),
            ],
            // The first disable stamp survives re-disables; the grace
            // period counts from it.
            set_if_not_exists: vec![(ATTR_DISABLED_AT, Value::N(now))],
            remove: vec![ATTR_ENABLED_AT],
        };
        let condition = Condition::NotEquals(
            ATTR_STATE,
            Value::S(KeyState::Deleted.as_str().to_string()),
        );
        match self
            .client
            .update_item(namespace, &key_sort(key_id), update, condition)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::ConditionFailed) => Err(KeyEngineError::KeyNotFound),
            Err(e) => Err(KeyEngineError::Disable(e.to_string())),
        }
    }

    async fn re_enable_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        let update = Update {
            set: vec![
                (ATTR_STATE, Value::S(KeyState::Active.as_str().to_string())),
                (ATTR_LSIK, Value::S(enabled_token(key_id))),
            ],
            set_if_not_exists: vec![(ATTR_ENABLED_AT, Value::N(now_secs()))],
            remove: vec![ATTR_DISABLED_AT],
        };
        let condition = Condition::NotEquals(
            ATTR_STATE,
            Value::S(KeyState::Deleted.as_str().to_string()),
        );
        match self
            .client
            .update_item(namespace, &key_sort(key_id), update, condition)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::ConditionFailed) => Err(KeyEngineError::KeyNotFound),
            Err(e) => Err(KeyEngineError::ReEnable(e.to_string())),
        }
    }

    async fn delete_key(&self, namespace: &str, key_id: &str) -> Result<(), KeyEngineError> {
        let update = Update {
            set: vec![
                (
                    ATTR_STATE,
                    Value::S(KeyState::Deleted.as_str().to_string()),
                ),
                (ATTR_DELETED_AT, Value::N(now_secs())),
            ],
            set_if_not_exists: Vec::new(),
            // Material is erased and the sweep token removed so no range
            // query can resurface the record.
            remove: vec![ATTR_KEY, ATTR_LSIK],
        };
        let condition = Condition::NotEquals(
            ATTR_STATE,
            Value::S(KeyState::Deleted.as_str().to_string()),
        );
        match self
            .client
            .update_item(namespace, &key_sort(key_id), update, condition)
            .await
        {
            Ok(_) => Ok(()),
            // Already deleted, or never existed: both are terminal no-ops.
            Err(StoreError::ConditionFailed) => Ok(()),
            Err(e) => Err(KeyEngineError::Delete(e.to_string())),
        }
    }

    fn as_sweeper(&self) -> Option<&dyn KeySweeper> {
        Some(self)
    }

    fn as_updater(&self) -> Option<&dyn KeyUpdater> {
        Some(self)
    }
}

#[async_trait]
impl<C: StoreClient + 'static> KeySweeper for StoreKeyEngine<C> {
    async fn delete_unused_keys(&self, namespace: &str) -> Result<(), KeyEngineError> {
        let cutoff = now_secs() - self.config.grace_period.as_secs() as i64;
        let docs = self
            .client
            .query(RangeQuery {
                partition: namespace.to_string(),
                index: QueryIndex::Secondary,
                range: Some((disabled_token(0), disabled_token(cutoff))),
                filter_in: None,
            })
            .await
            .map_err(|e| KeyEngineError::Delete(e.to_string()))?;

        let mut swept = 0usize;
        for doc in &docs {
            if let Some(key_id) = doc_s(doc, ATTR_KEY_ID) {
                self.delete_key(namespace, key_id).await?;
                swept += 1;
            }
        }
        if swept > 0 {
            info!(namespace, swept, "swept keys disabled past the grace period");
        }
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, KeyEngineError> {
        list_registered_namespaces(self.client.as_ref())
            .await
            .map_err(|e| KeyEngineError::Get(e.to_string()))
    }
}

#[async_trait]
impl<C: StoreClient + 'static> KeyUpdater for StoreKeyEngine<C> {
    async fn update_keys(
        &self,
        namespace: &str,
        keys: Vec<(String, Key)>,
    ) -> Result<(), KeyEngineError> {
        for (key_id, key) in keys {
            let update = Update {
                set: vec![(ATTR_KEY, Value::B(key.as_bytes().to_vec()))],
                ..Update::default()
            };
            let condition = Condition::Equals(
                ATTR_STATE,
                Value::S(KeyState::Active.as_str().to_string()),
            );
            match self
                .client
                .update_item(namespace, &key_sort(&key_id), update, condition)
                .await
            {
                Ok(_) => {}
                // The subject left the ACTIVE state mid-rotation; its
                // material must not be rewritten.
                Err(StoreError::ConditionFailed) => {
                    debug!(namespace, key_id = %key_id, "skipped material update, key not active");
                }
                Err(e) => return Err(KeyEngineError::Persist(e.to_string())),
            }
        }
        Ok(())
    }
}
