//! Single-use payment nonces.
//!
//! A nonce is issued with each 402 challenge and can be consumed exactly once,
//! and only while it is younger than the signature window. Two backings share
//! one contract: [`MemoryNonceRegistry`] for a single gateway process and
//! [`StoreNonceRegistry`] for gateways sharing one key-value store.

mod memory;
mod store;

pub use memory::MemoryNonceRegistry;
pub use store::StoreNonceRegistry;

use async_trait::async_trait;
use paygate_types::PaymentContext;
use std::str::FromStr;

#[async_trait]
pub trait NonceRegistry: Send + Sync {
    /// Record a fresh nonce and return the context the client must sign.
    async fn issue(&self) -> Result<PaymentContext, String>;

    /// Atomically mark `nonce` as used. `Ok(false)` when it is unknown,
    /// expired or already consumed.
    async fn consume(&self, nonce: &str) -> Result<bool, String>;

    /// Issued, not yet consumed and still inside its lifetime. Read-only.
    async fn is_pending(&self, nonce: &str) -> Result<bool, String>;

    /// Re-arm a consumed nonce that is still inside its lifetime.
    async fn release(&self, nonce: &str) -> Result<bool, String>;

    /// Stop background maintenance, if any.
    async fn shutdown(&self) {}

    fn backend_name(&self) -> &'static str;
}

/// What happens to a consumed nonce when the paid work then fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceFailurePolicy {
    /// The nonce stays spent; the failure is logged as billable-but-unserved.
    Burn,
    /// The nonce is released so the same signature can be retried.
    Refund,
}

impl FromStr for NonceFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "burn" => Ok(Self::Burn),
            "refund" => Ok(Self::Refund),
            other => Err(format!(
                "NONCE_FAILURE_POLICY must be 'burn' or 'refund', got '{}'",
                other
            )),
        }
    }
}

impl std::fmt::Display for NonceFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonceFailurePolicy::Burn => write!(f, "burn"),
            NonceFailurePolicy::Refund => write!(f, "refund"),
        }
    }
}

pub(crate) fn new_nonce() -> String {
    uuid::Uuid::new_v4().to_string()
}
