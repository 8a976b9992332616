//! Token engine stacks: durable store engine under the cache wrapper.

use std::sync::Arc;

use pii_guard::{
    token_data_slice, InMemoryTokenEngine, MemoryStoreClient, StoreTokenEngine, TokenEngine,
    TokenEngineCache, TokenError, TokenizeConfig,
};

fn stack() -> (Arc<StoreTokenEngine<MemoryStoreClient>>, InMemoryTokenEngine) {
    let store = Arc::new(StoreTokenEngine::new(Arc::new(MemoryStoreClient::new())));
    let cache = InMemoryTokenEngine::wrap(store.clone(), std::time::Duration::from_secs(60));
    (store, cache)
}

#[tokio::test]
async fn test_cache_and_store_agree_on_tokens() {
    let (store, cache) = stack();
    let values = token_data_slice(["alice@example.com", "bob@example.com"]);

    let cached = cache
        .tokenize("ns", &values, TokenizeConfig::default())
        .await
        .unwrap();
    let direct = store
        .tokenize("ns", &values, TokenizeConfig::default())
        .await
        .unwrap();

    for value in &values {
        assert_eq!(
            cached.get(value).unwrap().token,
            direct.get(value).unwrap().token
        );
    }
}

#[tokio::test]
async fn test_detokenize_round_trip_through_cache() {
    let (_store, cache) = stack();
    let values = token_data_slice(["4242 4242 4242 4242"]);

    let records = cache
        .tokenize("ns", &values, TokenizeConfig::default())
        .await
        .unwrap();
    let token = records.get(&values[0]).unwrap().token.clone();

    cache.clear_cache("ns", true).await.unwrap();

    let resolved = cache.detokenize("ns", &[token.clone()]).await.unwrap();
    assert_eq!(resolved.get(&token).unwrap().value, values[0]);
}

#[tokio::test]
async fn test_delete_token_reaches_the_store() {
    let (store, cache) = stack();
    let values = token_data_slice(["alice"]);

    let records = cache
        .tokenize("ns", &values, TokenizeConfig::default())
        .await
        .unwrap();
    let token = records.get(&values[0]).unwrap().token.clone();

    cache.delete_token("ns", &token).await.unwrap();

    assert!(store.detokenize("ns", &[token.clone()]).await.unwrap().is_empty());
    assert!(matches!(
        store.delete_token("ns", &token).await,
        Err(TokenError::NotFound)
    ));
}
