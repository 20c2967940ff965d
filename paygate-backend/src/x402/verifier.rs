//! Signature verification backends.
//!
//! The gateway either recovers signatures in-process or forwards the claim to
//! a standalone verifier service. Both produce the same [`VerifyVerdict`] for
//! the same claim.

use async_trait::async_trait;
use paygate_types::{VerifyRequest, VerifyResponse, CORRELATION_ID_HEADER};
use paygate_verifier::{recover, unix_now, TimeWindow, VerifyVerdict};
use std::time::Duration;

use crate::http::shared_client;

#[async_trait]
pub trait VerifierBackend: Send + Sync {
    /// Verify a claim. `Err` means the verifier could not produce a verdict
    /// at all; a rejected signature is an `Ok` verdict with `valid == false`.
    async fn verify(&self, claim: &VerifyRequest, correlation_id: &str) -> Result<VerifyVerdict, String>;

    fn mode_name(&self) -> &'static str;
}

pub struct LocalVerifier {
    window: TimeWindow,
}

impl LocalVerifier {
    pub fn new(window: TimeWindow) -> Self {
        Self { window }
    }
}

#[async_trait]
impl VerifierBackend for LocalVerifier {
    async fn verify(&self, claim: &VerifyRequest, _correlation_id: &str) -> Result<VerifyVerdict, String> {
        Ok(recover(&claim.context, &claim.signature, &self.window, unix_now()))
    }

    fn mode_name(&self) -> &'static str {
        "local"
    }
}

/// Client for the verifier service's `POST /verify`.
pub struct RemoteVerifier {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RemoteVerifier {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: shared_client().clone(),
            endpoint: format!("{}/verify", base_url.trim_end_matches('/')),
            timeout,
        }
    }
}

#[async_trait]
impl VerifierBackend for RemoteVerifier {
    async fn verify(&self, claim: &VerifyRequest, correlation_id: &str) -> Result<VerifyVerdict, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CORRELATION_ID_HEADER, correlation_id)
            .timeout(self.timeout)
            .json(claim)
            .send()
            .await
            .map_err(|e| format!("Verifier request failed: {}", e))?;

        let status = response.status();
        // 400 still carries a verdict (malformed signature / context)
        if !status.is_success() && status != reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "[X402] [CID: {}] Verifier returned {}: {}",
                correlation_id,
                status,
                body
            );
            return Err(format!("Verifier returned {}", status));
        }

        let parsed: VerifyResponse = response
            .json()
            .await
            .map_err(|e| format!("Invalid verifier response: {}", e))?;

        Ok(parsed.into())
    }

    fn mode_name(&self) -> &'static str {
        "remote"
    }
}
