//! Document store abstraction backing the durable key and token engines.
//!
//! The engines only need a narrow client contract: conditional writes on a
//! `(partition, sort)` primary key and consistent range queries over either
//! the sort key or one secondary string attribute (`_lsik`). Any store with
//! those properties can implement [`StoreClient`]; the crate ships an
//! in-memory client and a PostgreSQL client.
//!
//! Schema (one table):
//!
//! - `_pk` — namespace, or the literal `#ns_` for the namespace registry;
//! - `_sk` — `key#<subjectID>` for key records, `token#<token>` for token
//!   records, or the namespace inside the registry partition;
//! - `_lsik` — secondary sort attribute: `enabled@<subjectID>` while a key
//!   is active, `disabled@<unix-seconds>` while disabled, absent when
//!   deleted; `token@<value>` for token records;
//! - value attributes `_nspace`, `_kid`, `_key`, `_state`, `_createdAt`,
//!   `_enabledAt`, `_disabledAt`, `_deletedAt`, `_tkn`, `_tknv`, `_at`.

mod key_engine;
mod memory;
mod postgres;
mod token_engine;

pub use key_engine::StoreKeyEngine;
pub use memory::MemoryStoreClient;
pub use postgres::{connect as connect_postgres, PostgresStoreClient};
pub use token_engine::StoreTokenEngine;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;

pub const ATTR_PK: &str = "_pk";
pub const ATTR_SK: &str = "_sk";
pub const ATTR_LSIK: &str = "_lsik";
pub const ATTR_NAMESPACE: &str = "_nspace";
pub const ATTR_KEY_ID: &str = "_kid";
pub const ATTR_KEY: &str = "_key";
pub const ATTR_STATE: &str = "_state";
pub const ATTR_CREATED_AT: &str = "_createdAt";
pub const ATTR_ENABLED_AT: &str = "_enabledAt";
pub const ATTR_DISABLED_AT: &str = "_disabledAt";
pub const ATTR_DELETED_AT: &str = "_deletedAt";
pub const ATTR_TOKEN: &str = "_tkn";
pub const ATTR_TOKEN_VALUE: &str = "_tknv";
pub const ATTR_AT: &str = "_at";

/// Partition holding the namespace registry.
pub const NS_PARTITION: &str = "#ns_";

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    S(String),
    N(i64),
    B(Vec<u8>),
    Null,
}

impl Value {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Value::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            Value::N(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            Value::B(b) => Some(b),
            _ => None,
        }
    }
}

/// One stored item: a flat attribute map.
pub type Document = HashMap<String, Value>;

/// Reads a string attribute off a document.
pub fn doc_s<'a>(doc: &'a Document, attr: &str) -> Option<&'a str> {
    doc.get(attr).and_then(Value::as_s)
}

/// Reads a byte attribute off a document.
pub fn doc_b<'a>(doc: &'a Document, attr: &str) -> Option<&'a [u8]> {
    doc.get(attr).and_then(Value::as_b)
}

/// Write condition evaluated atomically with the operation.
///
/// Attribute conditions on a missing item fail, matching conditional-write
/// document stores: `Equals`/`NotEquals` require the item to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    None,
    /// The item must not exist.
    NotExists,
    /// The item must exist.
    Exists,
    Equals(&'static str, Value),
    NotEquals(&'static str, Value),
}

/// Attribute mutation applied by [`StoreClient::update_item`].
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub set: Vec<(&'static str, Value)>,
    /// Set only when the attribute is currently absent; the read-back
    /// document reports the resulting (possibly pre-existing) value.
    pub set_if_not_exists: Vec<(&'static str, Value)>,
    pub remove: Vec<&'static str>,
}

/// Which key a range query runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIndex {
    /// The `_sk` sort key.
    SortKey,
    /// The `_lsik` secondary sort attribute; items without it are invisible.
    Secondary,
}

/// A consistent range query within one partition.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub partition: String,
    pub index: QueryIndex,
    /// Inclusive bounds over the chosen key; `None` scans the partition.
    pub range: Option<(String, String)>,
    /// Post-filter: attribute value must be one of the listed values.
    pub filter_in: Option<(&'static str, Vec<Value>)>,
}

/// Narrow client contract over the backing document store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Writes a full item; the item carries its own `_pk`/`_sk`.
    async fn put_item(&self, item: Document, condition: Condition) -> Result<(), StoreError>;

    /// Mutates attributes of one item and returns the post-update values of
    /// every attribute named in the update.
    async fn update_item(
        &self,
        pk: &str,
        sk: &str,
        update: Update,
        condition: Condition,
    ) -> Result<Document, StoreError>;

    async fn delete_item(&self, pk: &str, sk: &str, condition: Condition)
        -> Result<(), StoreError>;

    /// Runs a consistent range query, results ordered by the queried key.
    async fn query(&self, query: RangeQuery) -> Result<Vec<Document>, StoreError>;
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
