//! Token engine contract: reversible pseudonymisation through a
//! value↔token lookup table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TokenError;

/// A sensitive value that should be tokenized.
///
/// `Debug` and `Display` redact the value so it never reaches logs by
/// accident; use [`TokenData::reveal`] for the raw string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenData(String);

impl TokenData {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw string value.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TokenData {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TokenData {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "**TOKEN DATA**")
    }
}

impl fmt::Display for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "**TOKEN DATA**")
    }
}

/// A token and the value it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token: String,
    pub value: TokenData,
}

/// Maps values to their token records.
pub type ValueTokenMap = HashMap<TokenData, TokenRecord>;

/// Maps tokens to their token records.
pub type TokenValueMap = HashMap<String, TokenRecord>;

/// Converts plain strings into token data values.
pub fn token_data_slice<I, S>(values: I) -> Vec<TokenData>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(|v| TokenData::new(v)).collect()
}

/// Mints a token for a fresh value.
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    async fn generate(&self, namespace: &str, value: &TokenData) -> Result<String, TokenError>;
}

/// Default token generator: a random 128-bit identifier in its canonical
/// hyphenated form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTokenGenerator;

#[async_trait]
impl TokenGenerator for UuidTokenGenerator {
    async fn generate(&self, _namespace: &str, _value: &TokenData) -> Result<String, TokenError> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// Per-call tokenize configuration.
#[derive(Clone)]
pub struct TokenizeConfig {
    /// Generator for fresh tokens; explicitly unsetting it makes tokenize
    /// fail with a token-gen-func-not-found error.
    pub token_gen: Option<Arc<dyn TokenGenerator>>,
}

impl TokenizeConfig {
    pub fn with_generator(token_gen: Arc<dyn TokenGenerator>) -> Self {
        Self {
            token_gen: Some(token_gen),
        }
    }
}

impl Default for TokenizeConfig {
    fn default() -> Self {
        Self {
            token_gen: Some(Arc::new(UuidTokenGenerator)),
        }
    }
}

/// Bidirectional value↔token mapping service.
#[async_trait]
pub trait TokenEngine: Send + Sync {
    /// Returns the token record for each value, minting and durably storing
    /// tokens for values seen for the first time.
    async fn tokenize(
        &self,
        namespace: &str,
        values: &[TokenData],
        config: TokenizeConfig,
    ) -> Result<ValueTokenMap, TokenError>;

    /// Returns the token record for each known token; unknown tokens are
    /// silently omitted.
    async fn detokenize(
        &self,
        namespace: &str,
        tokens: &[String],
    ) -> Result<TokenValueMap, TokenError>;

    /// Removes the token and its value mapping in both directions.
    async fn delete_token(&self, namespace: &str, token: &str) -> Result<(), TokenError>;

    /// Cache capability, when this engine provides one.
    fn as_cache(&self) -> Option<&dyn TokenEngineCache> {
        None
    }
}

/// Cache capability of a token engine wrapper.
#[async_trait]
pub trait TokenEngineCache: TokenEngine {
    /// Evicts cached entries past their time-to-live; `force` evicts all.
    async fn clear_cache(&self, namespace: &str, force: bool) -> Result<(), TokenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_data_redacted() {
        let data = TokenData::new("4242 4242 4242 4242");
        assert_eq!(format!("{data:?}"), "**TOKEN DATA**");
        assert_eq!(format!("{data}"), "**TOKEN DATA**");
        assert_eq!(data.reveal(), "4242 4242 4242 4242");
    }

    #[tokio::test]
    async fn test_default_generator_mints_unique_canonical_ids() {
        let generator = UuidTokenGenerator;
        let value = TokenData::new("v");
        let a = generator.generate("ns", &value).await.unwrap();
        let b = generator.generate("ns", &value).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
