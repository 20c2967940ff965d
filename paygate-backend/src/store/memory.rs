use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::sync::Cache;
use moka::Expiry;

use super::KvStore;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
    inserted_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// Lets each entry carry its own TTL instead of one cache-wide setting.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`KvStore`] on a moka cache.
///
/// [`MemoryStore::new`] only drops entries at their own deadline.
/// [`MemoryStore::with_capacity`] may also evict live entries once full, so it
/// is only fit for data that can be recomputed.
///
/// Expiry is lazy, so every read re-checks the entry's deadline.
pub struct MemoryStore {
    cache: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().expire_after(PerEntryTtl).build(),
        }
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let now = Instant::now();
        Ok(self
            .cache
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), String> {
        if ttl.is_zero() {
            return Err(format!("refusing to store {} with zero TTL", key));
        }
        self.cache.insert(
            key.to_string(),
            Entry {
                value,
                ttl,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, String> {
        let now = Instant::now();
        Ok(self.cache.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn delete(&self, key: &str) -> Result<bool, String> {
        // remove() hands the entry to exactly one caller
        let now = Instant::now();
        Ok(self.cache.remove(key).is_some_and(|e| e.is_live(now)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
