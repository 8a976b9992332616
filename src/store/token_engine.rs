//! Durable token engine over a [`StoreClient`].
//!
//! One item per token: the primary sort key `token#<token>` serves
//! detokenize range reads, the secondary `_lsik = token@<value>` serves the
//! reverse value→token lookup that tokenize needs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, TokenError};
use crate::store::key_engine::register_namespace;
use crate::store::{
    doc_s, now_secs, Condition, Document, QueryIndex, RangeQuery, StoreClient, Value,
    ATTR_CREATED_AT, ATTR_LSIK, ATTR_NAMESPACE, ATTR_PK, ATTR_SK, ATTR_TOKEN, ATTR_TOKEN_VALUE,
};
use crate::token::{
    TokenData, TokenEngine, TokenRecord, TokenValueMap, TokenizeConfig, ValueTokenMap,
};

fn token_sort(token: &str) -> String {
    format!("token#{token}")
}

fn value_token(value: &TokenData) -> String {
    format!("token@{}", value.reveal())
}

/// Token engine persisting the value↔token index in a conditional-write
/// document store.
pub struct StoreTokenEngine<C: StoreClient> {
    client: Arc<C>,
}

impl<C: StoreClient> StoreTokenEngine<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    async fn get_tokens(
        &self,
        namespace: &str,
        values: &[TokenData],
    ) -> Result<ValueTokenMap, StoreError> {
        let mut found = ValueTokenMap::new();
        if values.is_empty() {
            return Ok(found);
        }

        let mut sorted = values.to_vec();
        sorted.sort();
        sorted.dedup();

        let docs = self
            .client
            .query(RangeQuery {
                partition: namespace.to_string(),
                index: QueryIndex::Secondary,
                range: Some((
                    value_token(&sorted[0]),
                    value_token(&sorted[sorted.len() - 1]),
                )),
                filter_in: Some((
                    ATTR_TOKEN_VALUE,
                    sorted
                        .iter()
                        .map(|v| Value::S(v.reveal().to_string()))
                        .collect(),
                )),
            })
            .await?;

        for doc in &docs {
            if let (Some(token), Some(value)) =
                (doc_s(doc, ATTR_TOKEN), doc_s(doc, ATTR_TOKEN_VALUE))
            {
                let value = TokenData::new(value);
                found.insert(
                    value.clone(),
                    TokenRecord {
                        token: token.to_string(),
                        value,
                    },
                );
            }
        }
        Ok(found)
    }

    async fn create_token(
        &self,
        namespace: &str,
        record: &TokenRecord,
    ) -> Result<(), StoreError> {
        let mut item = Document::new();
        item.insert(ATTR_PK.to_string(), Value::S(namespace.to_string()));
        item.insert(ATTR_SK.to_string(), Value::S(token_sort(&record.token)));
        item.insert(ATTR_LSIK.to_string(), Value::S(value_token(&record.value)));
        item.insert(ATTR_NAMESPACE.to_string(), Value::S(namespace.to_string()));
        item.insert(ATTR_TOKEN.to_string(), Value::S(record.token.clone()));
        item.insert(
            ATTR_TOKEN_VALUE.to_string(),
            Value::S(record.value.reveal().to_string()),
        );
        item.insert(ATTR_CREATED_AT.to_string(), Value::N(now_secs()));

        self.client.put_item(item, Condition::NotExists).await
    }
}

#[async_trait]
impl<C: StoreClient + 'static> TokenEngine for StoreTokenEngine<C> {
    async fn tokenize(
        &self,
        namespace: &str,
        values: &[TokenData],
        config: TokenizeConfig,
    ) -> Result<ValueTokenMap, TokenError> {
        let token_gen = config.token_gen.ok_or(TokenError::GenFuncNotFound)?;

        let mut found = self
            .get_tokens(namespace, values)
            .await
            .map_err(|e| TokenError::Tokenize(e.to_string()))?;

        if found.is_empty() {
            register_namespace(self.client.as_ref(), namespace)
                .await
                .map_err(|e| TokenError::Tokenize(e.to_string()))?;
        }

        for value in values {
            if found.contains_key(value) {
                continue;
            }
            let token = token_gen.generate(namespace, value).await?;
            let record = TokenRecord {
                token,
                value: value.clone(),
            };
            self.create_token(namespace, &record)
                .await
                .map_err(|e| TokenError::Tokenize(e.to_string()))?;
            found.insert(value.clone(), record);
        }
        Ok(found)
    }

    async fn detokenize(
        &self,
        namespace: &str,
        tokens: &[String],
    ) -> Result<TokenValueMap, TokenError> {
        let mut resolved = TokenValueMap::new();
        if tokens.is_empty() {
            return Ok(resolved);
        }

        let mut sorted = tokens.to_vec();
        sorted.sort();
        sorted.dedup();

        let docs = self
            .client
            .query(RangeQuery {
                partition: namespace.to_string(),
                index: QueryIndex::SortKey,
                range: Some((
                    token_sort(&sorted[0]),
                    token_sort(&sorted[sorted.len() - 1]),
                )),
                filter_in: Some((
                    ATTR_TOKEN,
                    sorted.iter().map(|t| Value::S(t.clone())).collect(),
                )),
            })
            .await
            .map_err(|e| TokenError::Detokenize(e.to_string()))?;

        for doc in &docs {
            if let (Some(token), Some(value)) =
                (doc_s(doc, ATTR_TOKEN), doc_s(doc, ATTR_TOKEN_VALUE))
            {
                resolved.insert(
                    token.to_string(),
                    TokenRecord {
                        token: token.to_string(),
                        value: TokenData::new(value),
                    },
                );
            }
        }
        Ok(resolved)
    }

    async fn delete_token(&self, namespace: &str, token: &str) -> Result<(), TokenError> {
        match self
            .client
            .delete_item(namespace, &token_sort(token), Condition::Exists)
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionFailed) => Err(TokenError::NotFound),
            Err(e) => Err(TokenError::Delete(e.to_string())),
        }
    }
}
