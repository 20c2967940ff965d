//! Signed payment receipts.
//!
//! A receipt binds the payer, the payment terms and SHA-256 hashes of the
//! request and response bodies. The body is serialized to canonical JSON
//! (fixed field order) and signed with the server key using EIP-191
//! personal-sign, so any change to any field breaks verification.

use std::sync::Arc;
use std::time::Duration;

use ethers::core::k256::ecdsa::VerifyingKey;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Signature;
use ethers::utils::{hash_message, public_key_to_address};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::KvStore;

pub const RECEIPT_VERSION: &str = "1.0";
const RECEIPT_KEY_PREFIX: &str = "receipt:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptPayment {
    pub payer: String,
    pub recipient: String,
    pub amount: String,
    pub token: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceBinding {
    pub endpoint: String,
    pub request_hash: String,
    pub response_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub id: String,
    pub version: String,
    pub timestamp: i64,
    pub payment: ReceiptPayment,
    pub service: ServiceBinding,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedReceipt {
    pub receipt: Receipt,
    pub signature: String,
    pub server_public_key: String,
}

/// `sha256:<hex>` of raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn new_receipt_id() -> String {
    format!("rcpt_{}", uuid::Uuid::new_v4().simple())
}

fn canonical_bytes(receipt: &Receipt) -> Result<Vec<u8>, String> {
    serde_json::to_vec(receipt).map_err(|e| format!("Failed to serialize receipt: {}", e))
}

/// Issues, verifies and archives receipts.
pub struct ReceiptService {
    wallet: LocalWallet,
    public_key: String,
    store: Arc<dyn KvStore>,
    ttl: Duration,
    #[cfg(test)]
    fail_signing: std::sync::atomic::AtomicBool,
}

impl ReceiptService {
    pub fn new(private_key: &str, store: Arc<dyn KvStore>, ttl: Duration) -> Result<Self, String> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let wallet: LocalWallet = key
            .parse()
            .map_err(|e| format!("Invalid server signing key: {}", e))?;
        Ok(Self::from_wallet(wallet, store, ttl))
    }

    /// Random key for this process only. Receipts it signs cannot be checked
    /// against a stable public key after a restart.
    pub fn ephemeral(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        Self::from_wallet(wallet, store, ttl)
    }

    fn from_wallet(wallet: LocalWallet, store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        let point = wallet.signer().verifying_key().to_encoded_point(false);
        let public_key = format!("0x{}", hex::encode(point.as_bytes()));
        Self {
            wallet,
            public_key,
            store,
            ttl,
            #[cfg(test)]
            fail_signing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn address(&self) -> String {
        format!("{:?}", self.wallet.address())
    }

    fn sign(&self, receipt: Receipt) -> Result<SignedReceipt, String> {
        #[cfg(test)]
        if self.fail_signing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err("Failed to sign receipt: signer unavailable".to_string());
        }
        let bytes = canonical_bytes(&receipt)?;
        let signature = self
            .wallet
            .sign_hash(hash_message(&bytes))
            .map_err(|e| format!("Failed to sign receipt: {}", e))?;
        Ok(SignedReceipt {
            receipt,
            signature: format!("0x{}", hex::encode(signature.to_vec())),
            server_public_key: self.public_key.clone(),
        })
    }

    /// Sign a receipt for a served request and archive it.
    ///
    /// Archiving is best effort: the caller gets the signed receipt even when
    /// the store is down.
    pub async fn issue(
        &self,
        payment: ReceiptPayment,
        service: ServiceBinding,
    ) -> Result<SignedReceipt, String> {
        let receipt = Receipt {
            id: new_receipt_id(),
            version: RECEIPT_VERSION.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            payment,
            service,
        };
        let signed = self.sign(receipt)?;

        match serde_json::to_string(&signed) {
            Ok(raw) => {
                let key = format!("{}{}", RECEIPT_KEY_PREFIX, signed.receipt.id);
                if let Err(e) = self.store.set(&key, raw, self.ttl).await {
                    log::error!("[RECEIPT] Failed to store {}: {}", signed.receipt.id, e);
                }
            }
            Err(e) => log::error!("[RECEIPT] Failed to serialize {}: {}", signed.receipt.id, e),
        }

        log::info!(
            "[RECEIPT] Issued {} for payer {} nonce {}",
            signed.receipt.id,
            signed.receipt.payment.payer,
            signed.receipt.payment.nonce
        );
        Ok(signed)
    }

    /// Check the signature against the public key embedded in the receipt.
    pub fn verify(signed: &SignedReceipt) -> bool {
        let Ok(bytes) = canonical_bytes(&signed.receipt) else {
            return false;
        };
        let Ok(signature) = signed.signature.parse::<Signature>() else {
            return false;
        };
        let key_hex = signed.server_public_key.trim_start_matches("0x");
        let Ok(key_bytes) = hex::decode(key_hex) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&key_bytes) else {
            return false;
        };

        match signature.recover(hash_message(&bytes)) {
            Ok(signer) => signer == public_key_to_address(&verifying_key),
            Err(_) => false,
        }
    }

    /// `Ok(None)` for unknown or expired ids.
    pub async fn lookup(&self, id: &str) -> Result<Option<SignedReceipt>, String> {
        let raw = self.store.get(&format!("{}{}", RECEIPT_KEY_PREFIX, id)).await?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| format!("Corrupt receipt {}: {}", id, e)),
            None => Ok(None),
        }
    }
}
