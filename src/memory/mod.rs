//! In-process engines: the key cache wrapper and the token cache wrapper.
//!
//! Both types play a dual role. Wrapped around a durable engine they act as
//! read-through / write-through caches with TTL eviction; standalone they
//! act as bare in-memory engines, which is how the test suites and local
//! development run without a backing store.

mod key_engine;
mod token_engine;

pub use key_engine::{InMemoryKeyEngine, DEFAULT_CACHE_TTL};
pub use token_engine::InMemoryTokenEngine;
