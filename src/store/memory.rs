//! In-memory [`StoreClient`]: the reference implementation of the
//! conditional-write semantics, also used by the engine test suites.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::{
    Condition, Document, QueryIndex, RangeQuery, StoreClient, Update, Value, ATTR_LSIK, ATTR_PK,
    ATTR_SK,
};

/// Thread-safe in-memory document store.
///
/// Conditional operations are atomic under one lock, which is exactly the
/// per-item linearizability the engines rely on.
#[derive(Default)]
pub struct MemoryStoreClient {
    items: Mutex<BTreeMap<(String, String), Document>>,
}

impl MemoryStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a raw item, bypassing conditions. Intended for tests that need
    /// items with historical timestamps.
    pub fn seed(&self, item: Document) {
        let pk = item
            .get(ATTR_PK)
            .and_then(Value::as_s)
            .unwrap_or_default()
            .to_string();
        let sk = item
            .get(ATTR_SK)
            .and_then(Value::as_s)
            .unwrap_or_default()
            .to_string();
        self.items.lock().insert((pk, sk), item);
    }

    /// A raw snapshot of one item, for tests inspecting stored state.
    pub fn raw_item(&self, pk: &str, sk: &str) -> Option<Document> {
        self.items
            .lock()
            .get(&(pk.to_string(), sk.to_string()))
            .cloned()
    }
}

fn check_condition(existing: Option<&Document>, condition: &Condition) -> Result<(), StoreError> {
    let ok = match condition {
        Condition::None => true,
        Condition::NotExists => existing.is_none(),
        Condition::Exists => existing.is_some(),
        Condition::Equals(attr, value) => {
            existing.is_some_and(|doc| doc.get(*attr) == Some(value))
        }
        Condition::NotEquals(attr, value) => {
            existing.is_some_and(|doc| doc.get(*attr) != Some(value))
        }
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::ConditionFailed)
    }
}

#[async_trait]
impl StoreClient for MemoryStoreClient {
    async fn put_item(&self, item: Document, condition: Condition) -> Result<(), StoreError> {
        let pk = item
            .get(ATTR_PK)
            .and_then(Value::as_s)
            .ok_or_else(|| StoreError::Backend("item is missing _pk".to_string()))?
            .to_string();
        let sk = item
            .get(ATTR_SK)
            .and_then(Value::as_s)
            .ok_or_else(|| StoreError::Backend("item is missing _sk".to_string()))?
            .to_string();

        let mut items = self.items.lock();
        check_condition(items.get(&(pk.clone(), sk.clone())), &condition)?;
        items.insert((pk, sk), item);
        Ok(())
    }

    async fn update_item(
        &self,
        pk: &str,
        sk: &str,
        update: Update,
        condition: Condition,
    ) -> Result<Document, StoreError> {
        let key = (pk.to_string(), sk.to_string());
        let mut items = self.items.lock();
        check_condition(items.get(&key), &condition)?;

        let doc = items.entry(key).or_insert_with(|| {
            let mut fresh = Document::new();
            fresh.insert(ATTR_PK.to_string(), Value::S(pk.to_string()));
            fresh.insert(ATTR_SK.to_string(), Value::S(sk.to_string()));
            fresh
        });

        let mut updated = Document::new();
        for (attr, value) in update.set {
            doc.insert(attr.to_string(), value.clone());
            updated.insert(attr.to_string(), value);
        }
        for (attr, value) in update.set_if_not_exists {
            let current = doc.get(attr).filter(|v| **v != Value::Null).cloned();
            let result = match current {
                Some(existing) => existing,
                None => {
                    doc.insert(attr.to_string(), value.clone());
                    value
                }
            };
            updated.insert(attr.to_string(), result);
        }
        for attr in update.remove {
            doc.remove(attr);
        }
        Ok(updated)
    }

    async fn delete_item(
        &self,
        pk: &str,
        sk: &str,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let key = (pk.to_string(), sk.to_string());
        let mut items = self.items.lock();
        check_condition(items.get(&key), &condition)?;
        items.remove(&key);
        Ok(())
    }

    async fn query(&self, query: RangeQuery) -> Result<Vec<Document>, StoreError> {
        let items = self.items.lock();
        let mut results: Vec<(String, Document)> = Vec::new();

        let lower = (query.partition.clone(), String::new());
        for ((pk, sk), doc) in items.range(lower..) {
            if *pk != query.partition {
                break;
            }
            let sort_value = match query.index {
                QueryIndex::SortKey => Some(sk.as_str()),
                QueryIndex::Secondary => doc.get(ATTR_LSIK).and_then(Value::as_s),
            };
            let Some(sort_value) = sort_value else {
                continue;
            };
            if let Some((start, end)) = &query.range {
                if sort_value < start.as_str() || sort_value > end.as_str() {
                    continue;
                }
            }
            if let Some((attr, allowed)) = &query.filter_in {
                let matched = doc.get(*attr).is_some_and(|v| allowed.contains(v));
                if !matched {
                    continue;
                }
            }
            results.push((sort_value.to_string(), doc.clone()));
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results.into_iter().map(|(_, doc)| doc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pk: &str, sk: &str, lsik: Option<&str>) -> Document {
        let mut doc = Document::new();
        doc.insert(ATTR_PK.to_string(), Value::S(pk.to_string()));
        doc.insert(ATTR_SK.to_string(), Value::S(sk.to_string()));
        if let Some(lsik) = lsik {
            doc.insert(ATTR_LSIK.to_string(), Value::S(lsik.to_string()));
        }
        doc
    }

    #[tokio::test]
    async fn test_conditional_put() {
        let client = MemoryStoreClient::new();
        client
            .put_item(item("ns", "key#a", None), Condition::NotExists)
            .await
            .unwrap();
        let err = client
            .put_item(item("ns", "key#a", None), Condition::NotExists)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[tokio::test]
    async fn test_attribute_condition_fails_on_missing_item() {
        let client = MemoryStoreClient::new();
        let err = client
            .update_item(
                "ns",
                "key#ghost",
                Update::default(),
                Condition::NotEquals("_state", Value::S("DELETED".to_string())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[tokio::test]
    async fn test_set_if_not_exists_reads_back_existing() {
        let client = MemoryStoreClient::new();
        let mut doc = item("ns", "key#a", None);
        doc.insert("_key".to_string(), Value::B(vec![1, 2, 3]));
        client.put_item(doc, Condition::None).await.unwrap();

        let updated = client
            .update_item(
                "ns",
                "key#a",
                Update {
                    set_if_not_exists: vec![("_key", Value::Null)],
                    ..Update::default()
                },
                Condition::Exists,
            )
            .await
            .unwrap();
        assert_eq!(updated.get("_key").unwrap().as_b(), Some(&[1u8, 2, 3][..]));
    }

    #[tokio::test]
    async fn test_secondary_index_query_skips_items_without_lsik() {
        let client = MemoryStoreClient::new();
        client
            .put_item(item("ns", "key#a", Some("enabled@a")), Condition::None)
            .await
            .unwrap();
        client
            .put_item(item("ns", "key#b", None), Condition::None)
            .await
            .unwrap();
        client
            .put_item(item("other", "key#c", Some("enabled@c")), Condition::None)
            .await
            .unwrap();

        let docs = client
            .query(RangeQuery {
                partition: "ns".to_string(),
                index: QueryIndex::Secondary,
                range: Some(("enabled@".to_string(), "enabled@~".to_string())),
                filter_in: None,
            })
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(doc_sk(&docs[0]), "key#a");
    }

    fn doc_sk(doc: &Document) -> &str {
        doc.get(ATTR_SK).and_then(Value::as_s).unwrap()
    }
}
