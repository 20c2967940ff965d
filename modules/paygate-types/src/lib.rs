//! Shared wire types for the x402 paygate and its verifier service.

use serde::{Deserialize, Serialize};
use std::fmt;

// =====================================================
// Protocol Headers
// =====================================================

pub const SIGNATURE_HEADER: &str = "X-402-Signature";
pub const NONCE_HEADER: &str = "X-402-Nonce";
pub const TIMESTAMP_HEADER: &str = "X-402-Timestamp";
pub const RECEIPT_HEADER: &str = "X-402-Receipt";
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

// =====================================================
// Domain Types
// =====================================================

/// Payment terms a client signs over with EIP-712.
///
/// `recipient`, `token`, `amount` and `chain_id` are always server-authoritative;
/// `nonce` comes from a prior 402 challenge and `timestamp` is the client's
/// signing time in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentContext {
    pub recipient: String,
    pub token: String,
    pub amount: String,
    pub nonce: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl PaymentContext {
    /// Same context with the client-supplied nonce and timestamp swapped in.
    pub fn with_claim(&self, nonce: &str, timestamp: Option<u64>) -> Self {
        Self {
            nonce: nonce.to_string(),
            timestamp,
            ..self.clone()
        }
    }
}

/// Stable verification failure identifiers. Clients branch on these, so the
/// serialized names must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyErrorCode {
    InvalidContext,
    MalformedSignature,
    RecoveryFailed,
    SignatureExpired,
    SignatureFuture,
    MissingTimestamp,
}

impl VerifyErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyErrorCode::InvalidContext => "InvalidContext",
            VerifyErrorCode::MalformedSignature => "MalformedSignature",
            VerifyErrorCode::RecoveryFailed => "RecoveryFailed",
            VerifyErrorCode::SignatureExpired => "SignatureExpired",
            VerifyErrorCode::SignatureFuture => "SignatureFuture",
            VerifyErrorCode::MissingTimestamp => "MissingTimestamp",
        }
    }
}

impl fmt::Display for VerifyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub context: PaymentContext,
    pub signature: String,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub is_valid: bool,
    pub recovered_address: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<VerifyErrorCode>,
}

impl VerifyResponse {
    pub fn valid(recovered_address: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            recovered_address: Some(recovered_address.into()),
            error: None,
            code: None,
        }
    }

    pub fn invalid(code: VerifyErrorCode, msg: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            recovered_address: None,
            error: Some(msg.into()),
            code: Some(code),
        }
    }
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}
