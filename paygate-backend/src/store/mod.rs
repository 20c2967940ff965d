//! Key-value store boundary.
//!
//! The response cache, the receipt archive and the shared nonce registry only
//! ever talk to storage through [`KvStore`]. [`MemoryStore`] is the in-process
//! backing; any external store with TTL support fits behind the same trait.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, String>;

    /// Insert or overwrite `key`. The entry disappears after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), String>;

    async fn exists(&self, key: &str) -> Result<bool, String>;

    /// Remove `key` and report whether a live entry was removed.
    /// Concurrent deletes of the same key: exactly one sees `true`.
    async fn delete(&self, key: &str) -> Result<bool, String>;

    fn backend_name(&self) -> &'static str;
}

/// Storage split by retention.
///
/// Cached responses can be recomputed and may be evicted under pressure.
/// Receipts and nonces must survive until their TTL, so they never share a
/// bounded store with the cache.
#[derive(Clone)]
pub struct Stores {
    pub cache: Arc<dyn KvStore>,
    pub durable: Arc<dyn KvStore>,
}

impl Stores {
    pub fn in_memory(cache_max_entries: u64) -> Self {
        let stores = Self {
            cache: Arc::new(MemoryStore::with_capacity(cache_max_entries)),
            durable: Arc::new(MemoryStore::new()),
        };
        log::info!(
            "[STORE] Cache on {} (max {} entries), receipts and nonces on {}",
            stores.cache.backend_name(),
            cache_max_entries,
            stores.durable.backend_name()
        );
        stores
    }
}
