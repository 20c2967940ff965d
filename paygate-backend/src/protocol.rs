//! The x402 admission state machine.
//!
//! ```text
//! UNCHALLENGED --no claim--> CHALLENGED (402 + fresh nonce)
//! CHALLENGED --signature, nonce, timestamp--> VERIFYING
//! VERIFYING --bad verdict / spent nonce--> REJECTED (403)
//! VERIFYING --valid, nonce consumed--> ADMITTED --> cache/compute --> receipt (200)
//! ```
//!
//! Everything from VERIFYING on runs under one request deadline. The verifier
//! and compute calls get their own shorter budgets, clipped to what is left.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use paygate_types::{PaymentContext, VerifyErrorCode, VerifyRequest};
use paygate_verifier::{recover, unix_now, TimeWindow};
use serde::Deserialize;
use tokio::time::error::Elapsed;
use tokio::time::Instant;

use crate::cache::{cache_key, CacheEntry, ResponseCache};
use crate::compute::ComputeProvider;
use crate::error::PaygateError;
use crate::nonce::{NonceFailurePolicy, NonceRegistry};
use crate::receipts::{content_hash, ReceiptPayment, ReceiptService, ServiceBinding, SignedReceipt};
use crate::x402::{PaymentHeaders, PaymentTerms, VerifierBackend};

pub const SUMMARIZE_ENDPOINT: &str = "/api/ai/summarize";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unchallenged,
    Challenged,
    Verifying,
    Admitted,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
pub struct GateTimeouts {
    /// Whole VERIFYING..receipt path
    pub request: Duration,
    pub verifier: Duration,
    pub compute: Duration,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub terms: PaymentTerms,
    /// Signature age window, used when identifying payers for rate limiting
    pub window: TimeWindow,
    pub timeouts: GateTimeouts,
    pub failure_policy: NonceFailurePolicy,
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub result: String,
    pub receipt: SignedReceipt,
    pub payer: String,
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// No claim was presented; the client must sign this context.
    Challenge(PaymentContext),
    Served(ServedResponse),
}

pub struct PaymentGate {
    settings: GateSettings,
    nonces: Arc<dyn NonceRegistry>,
    verifier: Arc<dyn VerifierBackend>,
    cache: Arc<ResponseCache>,
    compute: Arc<dyn ComputeProvider>,
    receipts: Arc<ReceiptService>,
}

/// Per-request state tracker; logs every transition.
struct Transitions<'a> {
    state: GateState,
    correlation_id: &'a str,
}

impl<'a> Transitions<'a> {
    fn new(state: GateState, correlation_id: &'a str) -> Self {
        Self { state, correlation_id }
    }

    fn to(&mut self, next: GateState) {
        log::debug!(
            "[X402] [CID: {}] {:?} -> {:?}",
            self.correlation_id,
            self.state,
            next
        );
        self.state = next;
    }

    fn reject(&mut self, err: PaygateError) -> PaygateError {
        self.to(GateState::Rejected);
        log::info!("[X402] [CID: {}] Rejected: {}", self.correlation_id, err);
        err
    }
}

async fn within<F: Future>(deadline: Instant, budget: Duration, fut: F) -> Result<F::Output, Elapsed> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    tokio::time::timeout(remaining.min(budget), fut).await
}

impl PaymentGate {
    pub fn new(
        settings: GateSettings,
        nonces: Arc<dyn NonceRegistry>,
        verifier: Arc<dyn VerifierBackend>,
        cache: Arc<ResponseCache>,
        compute: Arc<dyn ComputeProvider>,
        receipts: Arc<ReceiptService>,
    ) -> Self {
        Self {
            settings,
            nonces,
            verifier,
            cache,
            compute,
            receipts,
        }
    }

    pub fn terms(&self) -> &PaymentTerms {
        &self.settings.terms
    }

    pub fn verifier_mode(&self) -> &'static str {
        self.verifier.mode_name()
    }

    pub fn nonce_backend(&self) -> &'static str {
        self.nonces.backend_name()
    }

    pub fn receipts(&self) -> &Arc<ReceiptService> {
        &self.receipts
    }

    pub async fn shutdown(&self) {
        self.nonces.shutdown().await;
    }

    /// The payer behind a claim whose nonce is still pending and whose
    /// signature recovers under the current terms. Spends nothing.
    ///
    /// Each pending nonce came from a challenge, so a caller cannot mint
    /// identities faster than it can obtain challenges.
    pub async fn identify_payer(&self, headers: &PaymentHeaders) -> Option<String> {
        if !headers.is_claim() {
            return None;
        }
        let signature = headers.signature.as_deref()?;
        let nonce = headers.nonce.as_deref()?;
        let timestamp = headers.timestamp.as_deref()?.parse::<u64>().ok()?;

        match self.nonces.is_pending(nonce).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                log::warn!("[X402] Nonce check failed while identifying payer: {}", e);
                return None;
            }
        }

        let context = self.settings.terms.context(nonce, Some(timestamp));
        let verdict = recover(&context, signature, &self.settings.window, unix_now());
        if verdict.valid {
            verdict.recovered_address
        } else {
            None
        }
    }

    /// Drive one request through the state machine.
    pub async fn handle(
        &self,
        headers: &PaymentHeaders,
        body: &[u8],
        correlation_id: &str,
    ) -> Result<GateOutcome, PaygateError> {
        let (Some(signature), Some(nonce)) = (headers.signature.as_deref(), headers.nonce.as_deref()) else {
            return self.challenge(correlation_id).await;
        };

        let mut fsm = Transitions::new(GateState::Challenged, correlation_id);

        let timestamp = match headers.timestamp.as_deref() {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                fsm.reject(PaygateError::InvalidRequest(
                    "X-402-Timestamp must be unix seconds".to_string(),
                ))
            })?,
            None => return Err(fsm.reject(PaygateError::MissingTimestamp)),
        };

        // Body problems are caught before the nonce is spent
        let request: SummarizeRequest = serde_json::from_slice(body)
            .map_err(|e| fsm.reject(PaygateError::InvalidRequest(format!("Invalid request body: {}", e))))?;
        if request.text.trim().is_empty() {
            return Err(fsm.reject(PaygateError::InvalidRequest("text must not be empty".to_string())));
        }

        let deadline = Instant::now() + self.settings.timeouts.request;
        fsm.to(GateState::Verifying);

        let claim = VerifyRequest {
            context: self.settings.terms.context(nonce, Some(timestamp)),
            signature: signature.to_string(),
        };
        let verdict = match within(deadline, self.settings.timeouts.verifier, self.verifier.verify(&claim, correlation_id)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => return Err(fsm.reject(PaygateError::UpstreamUnavailable(e))),
            Err(_) => return Err(fsm.reject(PaygateError::DeadlineExceeded("verification".to_string()))),
        };

        let payer = match (verdict.valid, verdict.recovered_address) {
            (true, Some(address)) => address,
            _ => {
                let code = verdict.error_code.unwrap_or(VerifyErrorCode::RecoveryFailed);
                return Err(fsm.reject(PaygateError::Verification {
                    code: code.into(),
                    message: verdict.message.unwrap_or_else(|| code.to_string()),
                }));
            }
        };

        match self.nonces.consume(nonce).await {
            Ok(true) => {}
            Ok(false) => return Err(fsm.reject(PaygateError::NonceRejected)),
            Err(e) => return Err(fsm.reject(PaygateError::UpstreamUnavailable(e))),
        }

        fsm.to(GateState::Admitted);
        log::info!(
            "[X402] [CID: {}] Payment accepted from {} nonce={}",
            correlation_id,
            payer,
            nonce
        );

        let key = cache_key(&request.text, self.compute.model());
        let cached = within(deadline, self.settings.timeouts.request, self.cache.lookup(&key))
            .await
            .unwrap_or(None);

        let (result, cache_hit) = match cached {
            Some(entry) => (entry.result, true),
            None => {
                let outcome = within(deadline, self.settings.timeouts.compute, self.compute.complete(&request.text)).await;
                match outcome {
                    Ok(Ok(result)) => {
                        self.cache.store_detached(
                            key,
                            CacheEntry {
                                result: result.clone(),
                                model: self.compute.model().to_string(),
                                stored_at: chrono::Utc::now().timestamp(),
                            },
                        );
                        (result, false)
                    }
                    Ok(Err(e)) => {
                        self.on_unserved(nonce, &payer, correlation_id).await;
                        return Err(PaygateError::UpstreamUnavailable(e));
                    }
                    Err(_) => {
                        self.on_unserved(nonce, &payer, correlation_id).await;
                        return Err(PaygateError::DeadlineExceeded("compute".to_string()));
                    }
                }
            }
        };

        let issued = self
            .receipts
            .issue(
                ReceiptPayment {
                    payer: payer.clone(),
                    recipient: self.settings.terms.recipient.clone(),
                    amount: self.settings.terms.amount.clone(),
                    token: self.settings.terms.token.clone(),
                    chain_id: self.settings.terms.chain_id,
                    nonce: nonce.to_string(),
                },
                ServiceBinding {
                    endpoint: self.settings.endpoint.clone(),
                    request_hash: content_hash(body),
                    response_hash: content_hash(result.as_bytes()),
                },
            )
            .await;
        let receipt = match issued {
            Ok(receipt) => receipt,
            Err(e) => {
                self.on_unserved(nonce, &payer, correlation_id).await;
                return Err(PaygateError::Internal(e));
            }
        };

        Ok(GateOutcome::Served(ServedResponse {
            result,
            receipt,
            payer,
            cache_hit,
        }))
    }

    async fn challenge(&self, correlation_id: &str) -> Result<GateOutcome, PaygateError> {
        let mut fsm = Transitions::new(GateState::Unchallenged, correlation_id);
        let context = self
            .nonces
            .issue()
            .await
            .map_err(PaygateError::UpstreamUnavailable)?;
        fsm.to(GateState::Challenged);
        log::info!(
            "[X402] [CID: {}] Payment required, issued nonce {}",
            correlation_id,
            context.nonce
        );
        Ok(GateOutcome::Challenge(context))
    }

    /// Paid work failed after the nonce was spent.
    async fn on_unserved(&self, nonce: &str, payer: &str, correlation_id: &str) {
        match self.settings.failure_policy {
            NonceFailurePolicy::Burn => {
                log::warn!(
                    "[X402] [CID: {}] Billable but unserved: payer {} nonce {}",
                    correlation_id,
                    payer,
                    nonce
                );
            }
            NonceFailurePolicy::Refund => match self.nonces.release(nonce).await {
                Ok(true) => log::info!("[X402] [CID: {}] Released nonce {} for retry", correlation_id, nonce),
                Ok(false) => log::warn!(
                    "[X402] [CID: {}] Nonce {} could not be released (expired)",
                    correlation_id,
                    nonce
                ),
                Err(e) => log::error!("[X402] [CID: {}] Failed to release nonce {}: {}", correlation_id, nonce, e),
            },
        }
    }
}
