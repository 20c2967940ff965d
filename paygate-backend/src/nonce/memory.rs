use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use paygate_types::PaymentContext;
use paygate_verifier::unix_now;
use parking_lot::Mutex;

use super::{new_nonce, NonceRegistry};
use crate::tasks::PeriodicTask;
use crate::x402::PaymentTerms;

#[derive(Debug, Clone)]
struct NonceRecord {
    issued_at: u64,
    consumed: bool,
}

/// In-process nonce registry.
///
/// Consumption takes the DashMap shard lock for the key, so the
/// check-and-set is atomic per nonce without a global lock.
pub struct MemoryNonceRegistry {
    terms: PaymentTerms,
    lifetime_seconds: u64,
    records: DashMap<String, NonceRecord>,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl MemoryNonceRegistry {
    pub fn new(terms: PaymentTerms, lifetime_seconds: u64) -> Self {
        Self {
            terms,
            lifetime_seconds,
            records: DashMap::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Purge expired records every `every`. The task holds a weak reference
    /// and ends on its own once the registry is dropped.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("nonce-sweeper", every, move || match weak.upgrade() {
            Some(registry) => {
                let purged = registry.purge_expired_at(unix_now());
                if purged > 0 {
                    log::debug!("[NONCE] Purged {} expired nonces", purged);
                }
                true
            }
            None => false,
        });
        if let Some(previous) = self.sweeper.lock().replace(task) {
            tokio::spawn(previous.shutdown());
        }
    }

    fn is_expired(&self, record: &NonceRecord, now: u64) -> bool {
        now.saturating_sub(record.issued_at) > self.lifetime_seconds
    }

    pub(crate) fn issue_at(&self, now: u64) -> PaymentContext {
        let nonce = new_nonce();
        self.records.insert(
            nonce.clone(),
            NonceRecord {
                issued_at: now,
                consumed: false,
            },
        );
        self.terms.context(&nonce, Some(now))
    }

    pub(crate) fn consume_at(&self, nonce: &str, now: u64) -> bool {
        match self.records.get_mut(nonce) {
            Some(mut record) if !record.consumed && !self.is_expired(&record, now) => {
                record.consumed = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_pending_at(&self, nonce: &str, now: u64) -> bool {
        self.records
            .get(nonce)
            .is_some_and(|record| !record.consumed && !self.is_expired(&record, now))
    }

    pub(crate) fn release_at(&self, nonce: &str, now: u64) -> bool {
        match self.records.get_mut(nonce) {
            Some(mut record) if record.consumed && !self.is_expired(&record, now) => {
                record.consumed = false;
                true
            }
            _ => false,
        }
    }

    /// Drop every record past its lifetime, consumed or not.
    pub fn purge_expired_at(&self, now: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !self.is_expired(record, now));
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl NonceRegistry for MemoryNonceRegistry {
    async fn issue(&self) -> Result<PaymentContext, String> {
        Ok(self.issue_at(unix_now()))
    }

    async fn consume(&self, nonce: &str) -> Result<bool, String> {
        Ok(self.consume_at(nonce, unix_now()))
    }

    async fn is_pending(&self, nonce: &str) -> Result<bool, String> {
        Ok(self.is_pending_at(nonce, unix_now()))
    }

    async fn release(&self, nonce: &str) -> Result<bool, String> {
        Ok(self.release_at(nonce, unix_now()))
    }

    async fn shutdown(&self) {
        let task = self.sweeper.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
