//! x402 gateway-side data types

use actix_web::http::header::HeaderMap;
use paygate_types::{PaymentContext, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde::Serialize;

/// Server-authoritative pricing for the metered endpoint.
///
/// Recipient, token, amount and chain id always come from here, never from the
/// client, when a context is rebuilt for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    pub recipient: String,
    pub token: String,
    pub amount: String,
    pub chain_id: u64,
}

impl PaymentTerms {
    pub fn context(&self, nonce: &str, timestamp: Option<u64>) -> PaymentContext {
        PaymentContext {
            recipient: self.recipient.clone(),
            token: self.token.clone(),
            amount: self.amount.clone(),
            nonce: nonce.to_string(),
            chain_id: self.chain_id,
            timestamp,
        }
    }
}

/// The three X-402 request headers, as sent.
#[derive(Debug, Clone, Default)]
pub struct PaymentHeaders {
    pub signature: Option<String>,
    pub nonce: Option<String>,
    pub timestamp: Option<String>,
}

impl PaymentHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            signature: read(SIGNATURE_HEADER),
            nonce: read(NONCE_HEADER),
            timestamp: read(TIMESTAMP_HEADER),
        }
    }

    /// A request only leaves the unchallenged state once it carries both a
    /// signature and the nonce it claims to pay for.
    pub fn is_claim(&self) -> bool {
        self.signature.is_some() && self.nonce.is_some()
    }
}

/// Body of a 402 response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub error: &'static str,
    pub message: &'static str,
    pub payment_context: PaymentContext,
}

impl PaymentChallenge {
    pub fn new(payment_context: PaymentContext) -> Self {
        Self {
            error: "Payment Required",
            message: "Please sign the payment context",
            payment_context,
        }
    }
}
