//! Content-addressed response cache.
//!
//! Keys are derived from the request content and the model id only, never
//! from who paid. Lookups happen after payment verification; a store outage
//! turns the cache into a miss instead of failing the request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::store::KvStore;

pub const CACHE_KEY_PREFIX: &str = "ai_cache:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub result: String,
    pub model: String,
    pub stored_at: i64,
}

/// Trim and collapse whitespace runs. Case is kept.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn cache_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    format!("{}{}", CACHE_KEY_PREFIX, hex::encode(hasher.finalize()))
}

pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, enabled: bool) -> Self {
        Self { store, ttl, enabled }
    }

    pub fn disabled(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, Duration::from_secs(1), false)
    }

    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    log::debug!("[CACHE] Hit {}", key);
                    Some(entry)
                }
                Err(e) => {
                    log::warn!("[CACHE] Discarding unreadable entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("[CACHE] Lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub async fn store(&self, key: &str, entry: &CacheEntry) {
        self.store_with_ttl(key, entry, self.ttl).await
    }

    pub async fn store_with_ttl(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("[CACHE] Failed to serialize entry: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(key, raw, ttl).await {
            log::warn!("[CACHE] Store failed for {}: {}", key, e);
        }
    }

    /// Write in the background so the paid response is not held up.
    pub fn store_detached(self: &Arc<Self>, key: String, entry: CacheEntry) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.store(&key, &entry).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::UnavailableStore;
    use crate::store::MemoryStore;

    fn entry(result: &str) -> CacheEntry {
        CacheEntry {
            result: result.into(),
            model: "m".into(),
            stored_at: 0,
        }
    }

    #[test]
    fn test_key_normalizes_whitespace_only() {
        assert_eq!(cache_key("  hello \n\t world ", "m"), cache_key("hello world", "m"));
        assert_ne!(cache_key("Hello world", "m"), cache_key("hello world", "m"));
        assert_ne!(cache_key("hello world", "m1"), cache_key("hello world", "m2"));
        assert!(cache_key("x", "m").starts_with(CACHE_KEY_PREFIX));
        assert_eq!(cache_key("x", "m").len(), CACHE_KEY_PREFIX.len() + 64);
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = Arc::new(ResponseCache::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(60),
            true,
        ));
        let key = cache_key("text", "m");
        assert!(cache.lookup(&key).await.is_none());

        cache.store_detached(key.clone(), entry("summary")).await.unwrap();
        assert_eq!(cache.lookup(&key).await, Some(entry("summary")));
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = ResponseCache::disabled(store.clone());
        cache.store("k", &entry("x")).await;

        assert!(cache.lookup("k").await.is_none());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_miss() {
        let cache = ResponseCache::new(Arc::new(UnavailableStore), Duration::from_secs(60), true);
        cache.store("k", &entry("x")).await;
        assert!(cache.lookup("k").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store.set("k", "not json".into(), Duration::from_secs(60)).await.unwrap();
        let cache = ResponseCache::new(store, Duration::from_secs(60), true);
        assert!(cache.lookup("k").await.is_none());
    }
}
