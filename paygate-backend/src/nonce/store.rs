use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paygate_types::PaymentContext;
use paygate_verifier::unix_now;

use super::{new_nonce, NonceRegistry};
use crate::store::KvStore;
use crate::x402::PaymentTerms;

const PENDING_PREFIX: &str = "nonce:";
const SPENT_PREFIX: &str = "nonce_spent:";

/// Nonce registry on a shared [`KvStore`], so several gateway instances can
/// honour each other's challenges.
///
/// A pending nonce is a key with the nonce lifetime as TTL; consuming it is a
/// delete, which the store guarantees to hand to one caller only. A spent
/// marker with the remaining lifetime is kept so the nonce can be released.
pub struct StoreNonceRegistry {
    terms: PaymentTerms,
    lifetime_seconds: u64,
    store: Arc<dyn KvStore>,
}

impl StoreNonceRegistry {
    pub fn new(terms: PaymentTerms, lifetime_seconds: u64, store: Arc<dyn KvStore>) -> Self {
        Self {
            terms,
            lifetime_seconds,
            store,
        }
    }

    fn remaining(&self, issued_at: u64, now: u64) -> Option<Duration> {
        let age = now.saturating_sub(issued_at);
        if age > self.lifetime_seconds {
            return None;
        }
        // at least one second so a nonce issued this instant is still storable
        Some(Duration::from_secs((self.lifetime_seconds - age).max(1)))
    }
}

#[async_trait]
impl NonceRegistry for StoreNonceRegistry {
    async fn issue(&self) -> Result<PaymentContext, String> {
        let now = unix_now();
        let nonce = new_nonce();
        self.store
            .set(
                &format!("{}{}", PENDING_PREFIX, nonce),
                now.to_string(),
                Duration::from_secs(self.lifetime_seconds.max(1)),
            )
            .await?;
        Ok(self.terms.context(&nonce, Some(now)))
    }

    async fn consume(&self, nonce: &str) -> Result<bool, String> {
        let key = format!("{}{}", PENDING_PREFIX, nonce);
        let Some(issued_at) = self.store.get(&key).await? else {
            return Ok(false);
        };
        if !self.store.delete(&key).await? {
            // another instance won the race
            return Ok(false);
        }

        let issued_at: u64 = issued_at.parse().unwrap_or(0);
        let Some(ttl) = self.remaining(issued_at, unix_now()) else {
            return Ok(false);
        };
        if let Err(e) = self
            .store
            .set(&format!("{}{}", SPENT_PREFIX, nonce), issued_at.to_string(), ttl)
            .await
        {
            log::warn!("[NONCE] Failed to record spent nonce {}: {}", nonce, e);
        }
        Ok(true)
    }

    async fn is_pending(&self, nonce: &str) -> Result<bool, String> {
        self.store.exists(&format!("{}{}", PENDING_PREFIX, nonce)).await
    }

    async fn release(&self, nonce: &str) -> Result<bool, String> {
        let spent_key = format!("{}{}", SPENT_PREFIX, nonce);
        let Some(issued_at) = self.store.get(&spent_key).await? else {
            return Ok(false);
        };
        if !self.store.delete(&spent_key).await? {
            return Ok(false);
        }

        let issued_at: u64 = issued_at.parse().unwrap_or(0);
        let Some(ttl) = self.remaining(issued_at, unix_now()) else {
            return Ok(false);
        };
        self.store
            .set(&format!("{}{}", PENDING_PREFIX, nonce), issued_at.to_string(), ttl)
            .await?;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "store"
    }
}
