//! End-to-end scenarios for the admission state machine, run against
//! in-memory registries, the in-process verifier and scripted providers.

use crate::cache::{cache_key, CacheEntry, ResponseCache};
use crate::compute::testing::FakeCompute;
use crate::compute::ComputeProvider;
use crate::error::{ErrorCode, PaygateError};
use crate::nonce::{MemoryNonceRegistry, NonceFailurePolicy, NonceRegistry};
use crate::protocol::{GateOutcome, GateSettings, GateTimeouts, PaymentGate, ServedResponse, SUMMARIZE_ENDPOINT};
use crate::receipts::{content_hash, ReceiptService};
use crate::store::MemoryStore;
use crate::x402::{LocalVerifier, PaymentHeaders, PaymentTerms, VerifierBackend};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use paygate_types::{PaymentContext, VerifyRequest};
use paygate_verifier::{sign_context, unix_now, TimeWindow, VerifyVerdict};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CLIENT_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcbc0e2ee1d8a41d2b";
const SERVER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const BODY: &[u8] = br#"{"text":"The quick brown fox jumps over the lazy dog."}"#;

fn terms() -> PaymentTerms {
    PaymentTerms {
        recipient: "0x2cAF48b4BA1C58721a85dFADa5aC01C2DFa62219".into(),
        token: "USDC".into(),
        amount: "0.001".into(),
        chain_id: 8453,
    }
}

struct Harness {
    gate: Arc<PaymentGate>,
    nonces: Arc<MemoryNonceRegistry>,
    cache: Arc<ResponseCache>,
    receipts: Arc<ReceiptService>,
    wallet: LocalWallet,
}

struct HarnessBuilder {
    compute: Arc<dyn ComputeProvider>,
    verifier: Arc<dyn VerifierBackend>,
    policy: NonceFailurePolicy,
    timeouts: GateTimeouts,
}

impl HarnessBuilder {
    fn new(compute: Arc<dyn ComputeProvider>) -> Self {
        Self {
            compute,
            verifier: Arc::new(LocalVerifier::new(TimeWindow::default())),
            policy: NonceFailurePolicy::Burn,
            timeouts: GateTimeouts {
                request: Duration::from_secs(10),
                verifier: Duration::from_secs(2),
                compute: Duration::from_secs(5),
            },
        }
    }

    fn verifier(mut self, verifier: Arc<dyn VerifierBackend>) -> Self {
        self.verifier = verifier;
        self
    }

    fn policy(mut self, policy: NonceFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn compute_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.compute = timeout;
        self
    }

    fn verifier_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.verifier = timeout;
        self
    }

    fn build(self) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let nonces = Arc::new(MemoryNonceRegistry::new(
            terms(),
            TimeWindow::default().nonce_lifetime_seconds(),
        ));
        let cache = Arc::new(ResponseCache::new(store.clone(), Duration::from_secs(3600), true));
        let receipts = Arc::new(ReceiptService::new(SERVER_KEY, store, Duration::from_secs(86400)).unwrap());
        let gate = PaymentGate::new(
            GateSettings {
                terms: terms(),
                window: TimeWindow::default(),
                timeouts: self.timeouts,
                failure_policy: self.policy,
                endpoint: SUMMARIZE_ENDPOINT.to_string(),
            },
            nonces.clone(),
            self.verifier,
            cache.clone(),
            self.compute,
            receipts.clone(),
        );
        Harness {
            gate: Arc::new(gate),
            nonces,
            cache,
            receipts,
            wallet: CLIENT_KEY.parse().unwrap(),
        }
    }
}

fn claim_headers(signature: &str, ctx: &PaymentContext) -> PaymentHeaders {
    PaymentHeaders {
        signature: Some(signature.to_string()),
        nonce: Some(ctx.nonce.clone()),
        timestamp: ctx.timestamp.map(|t| t.to_string()),
    }
}

impl Harness {
    async fn challenge(&self) -> PaymentContext {
        match self.gate.handle(&PaymentHeaders::default(), BODY, "cid").await.unwrap() {
            GateOutcome::Challenge(ctx) => ctx,
            other => panic!("expected challenge, got {:?}", other),
        }
    }

    /// Fetch a challenge and sign it with the client wallet.
    async fn signed_claim(&self) -> PaymentHeaders {
        let ctx = self.challenge().await;
        let signature = sign_context(&self.wallet, &ctx).unwrap();
        claim_headers(&signature, &ctx)
    }

    async fn pay(&self, headers: &PaymentHeaders) -> Result<GateOutcome, PaygateError> {
        self.gate.handle(headers, BODY, "cid").await
    }

    fn payer(&self) -> String {
        format!("{:?}", self.wallet.address()).to_lowercase()
    }
}

fn served(outcome: Result<GateOutcome, PaygateError>) -> ServedResponse {
    match outcome {
        Ok(GateOutcome::Served(s)) => s,
        Ok(other) => panic!("expected served response, got {:?}", other),
        Err(e) => panic!("expected served response, got error {}", e),
    }
}

fn error_code(outcome: Result<GateOutcome, PaygateError>) -> ErrorCode {
    match outcome {
        Err(e) => e.code(),
        Ok(other) => panic!("expected error, got {:?}", other),
    }
}

/// Fails the first `failures` calls, then succeeds.
struct FlakyCompute {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl ComputeProvider for FlakyCompute {
    fn model(&self) -> &str {
        "flaky"
    }

    async fn complete(&self, _text: &str) -> Result<String, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err("provider overloaded".to_string())
        } else {
            Ok("recovered summary".to_string())
        }
    }
}

struct StuckVerifier;

#[async_trait]
impl VerifierBackend for StuckVerifier {
    async fn verify(&self, _claim: &VerifyRequest, _cid: &str) -> Result<VerifyVerdict, String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err("unreachable".to_string())
    }

    fn mode_name(&self) -> &'static str {
        "stuck"
    }
}

struct DownVerifier;

#[async_trait]
impl VerifierBackend for DownVerifier {
    async fn verify(&self, _claim: &VerifyRequest, _cid: &str) -> Result<VerifyVerdict, String> {
        Err("connection refused".to_string())
    }

    fn mode_name(&self) -> &'static str {
        "down"
    }
}

async fn wait_for_cache(cache: &ResponseCache, key: &str) -> CacheEntry {
    for _ in 0..100 {
        if let Some(entry) = cache.lookup(key).await {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cache entry {} never appeared", key);
}

#[tokio::test]
async fn test_unpaid_request_gets_challenge() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let ctx = h.challenge().await;

    assert_eq!(ctx.nonce.len(), 36);
    assert_eq!(ctx.amount, "0.001");
    assert_eq!(ctx.token, "USDC");
    assert_eq!(ctx.chain_id, 8453);
    assert!(ctx.timestamp.is_some());
    assert_eq!(h.nonces.len(), 1);
}

#[tokio::test]
async fn test_signed_retry_served_then_replay_rejected() {
    let compute = Arc::new(FakeCompute::ok("A fox jumps. A dog lies."));
    let h = HarnessBuilder::new(compute.clone()).build();
    let headers = h.signed_claim().await;

    let response = served(h.pay(&headers).await);
    assert_eq!(response.result, "A fox jumps. A dog lies.");
    assert_eq!(response.payer, h.payer());
    assert!(!response.cache_hit);
    assert!(response.receipt.receipt.id.starts_with("rcpt_"));
    assert!(ReceiptService::verify(&response.receipt));

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::NonceUnknownOrReplayed);
    assert_eq!(compute.calls(), 1);
}

#[tokio::test]
async fn test_receipt_binds_payment_and_content() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("short summary"))).build();
    let headers = h.signed_claim().await;
    let response = served(h.pay(&headers).await);
    let receipt = &response.receipt.receipt;

    assert_eq!(receipt.payment.payer, h.payer());
    assert_eq!(receipt.payment.recipient, terms().recipient);
    assert_eq!(receipt.payment.amount, "0.001");
    assert_eq!(receipt.payment.chain_id, 8453);
    assert_eq!(Some(&receipt.payment.nonce), headers.nonce.as_ref());
    assert_eq!(receipt.service.endpoint, SUMMARIZE_ENDPOINT);
    assert_eq!(receipt.service.request_hash, content_hash(BODY));
    assert_eq!(receipt.service.response_hash, content_hash(b"short summary"));

    let archived = h.gate.receipts().lookup(&receipt.id).await.unwrap();
    assert_eq!(archived, Some(response.receipt.clone()));
}

#[tokio::test]
async fn test_cache_never_bypasses_payment() {
    let compute = Arc::new(FakeCompute::ok("fresh"));
    let h = HarnessBuilder::new(compute.clone()).build();

    let text = "The quick brown fox jumps over the lazy dog.";
    let key = cache_key(text, compute.model());
    h.cache
        .store(
            &key,
            &CacheEntry {
                result: "cached".into(),
                model: compute.model().into(),
                stored_at: 0,
            },
        )
        .await;

    // no signature: still a 402
    assert!(matches!(
        h.pay(&PaymentHeaders::default()).await,
        Ok(GateOutcome::Challenge(_))
    ));

    // garbage signature: still a 403
    let ctx = h.challenge().await;
    let bad = claim_headers(&format!("0x{}", "00".repeat(65)), &ctx);
    assert_eq!(error_code(h.pay(&bad).await), ErrorCode::RecoveryFailed);

    // paid: served from cache without calling the provider
    let response = served(h.pay(&h.signed_claim().await).await);
    assert!(response.cache_hit);
    assert_eq!(response.result, "cached");
    assert_eq!(compute.calls(), 0);
}

#[tokio::test]
async fn test_second_payment_for_same_content_hits_cache() {
    let compute = Arc::new(FakeCompute::ok("summary"));
    let h = HarnessBuilder::new(compute.clone()).build();

    let first = served(h.pay(&h.signed_claim().await).await);
    assert!(!first.cache_hit);
    wait_for_cache(&h.cache, &cache_key("The quick brown fox jumps over the lazy dog.", "fake-model")).await;

    let second = served(h.pay(&h.signed_claim().await).await);
    assert!(second.cache_hit);
    assert_eq!(second.result, "summary");
    assert_eq!(compute.calls(), 1);
    assert_ne!(first.receipt.receipt.id, second.receipt.receipt.id);
}

#[tokio::test]
async fn test_missing_or_bad_timestamp_does_not_spend_nonce() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let mut headers = h.signed_claim().await;
    let good_ts = headers.timestamp.take();

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::MissingTimestamp);

    headers.timestamp = Some("yesterday".into());
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::InvalidRequest);

    headers.timestamp = good_ts;
    served(h.pay(&headers).await);
}

#[tokio::test]
async fn test_invalid_body_does_not_spend_nonce() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let headers = h.signed_claim().await;

    let err = h.gate.handle(&headers, b"{\"txt\":1}", "cid").await;
    assert_eq!(error_code(err), ErrorCode::InvalidRequest);
    let err = h.gate.handle(&headers, b"{\"text\":\"   \"}", "cid").await;
    assert_eq!(error_code(err), ErrorCode::InvalidRequest);

    served(h.pay(&headers).await);
}

#[tokio::test]
async fn test_expired_signature_rejected() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let mut ctx = h.challenge().await;
    ctx.timestamp = Some(unix_now() - 301);
    let headers = claim_headers(&sign_context(&h.wallet, &ctx).unwrap(), &ctx);

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::SignatureExpired);
}

#[tokio::test]
async fn test_future_signature_rejected() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let mut ctx = h.challenge().await;
    ctx.timestamp = Some(unix_now() + 3600);
    let headers = claim_headers(&sign_context(&h.wallet, &ctx).unwrap(), &ctx);

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::SignatureFuture);
}

#[tokio::test]
async fn test_malformed_signature_rejected() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let ctx = h.challenge().await;
    let headers = claim_headers("0xdeadbeef", &ctx);

    let err = h.pay(&headers).await;
    assert_eq!(error_code(err), ErrorCode::MalformedSignature);
}

#[tokio::test]
async fn test_never_issued_nonce_rejected() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let ctx = terms().context("3f0c3c1e-8d55-4a7e-9a0b-1b2c3d4e5f60", Some(unix_now()));
    let headers = claim_headers(&sign_context(&h.wallet, &ctx).unwrap(), &ctx);

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::NonceUnknownOrReplayed);
}

#[tokio::test]
async fn test_client_altered_terms_do_not_recover_client() {
    // The server rebuilds the context from its own terms, so a signature over
    // a cheaper amount recovers some other address, never the client's.
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let mut ctx = h.challenge().await;
    ctx.amount = "0.000001".into();
    let headers = claim_headers(&sign_context(&h.wallet, &ctx).unwrap(), &ctx);

    if let Ok(GateOutcome::Served(response)) = h.pay(&headers).await {
        assert_ne!(response.payer, h.payer());
    }
}

#[tokio::test]
async fn test_compute_failure_burns_nonce_by_default() {
    let compute = Arc::new(FlakyCompute {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let h = HarnessBuilder::new(compute).build();
    let headers = h.signed_claim().await;

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::UpstreamUnavailable);
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::NonceUnknownOrReplayed);
}

#[tokio::test]
async fn test_compute_failure_refund_allows_retry() {
    let compute = Arc::new(FlakyCompute {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let h = HarnessBuilder::new(compute)
        .policy(NonceFailurePolicy::Refund)
        .build();
    let headers = h.signed_claim().await;

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::UpstreamUnavailable);
    let response = served(h.pay(&headers).await);
    assert_eq!(response.result, "recovered summary");
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::NonceUnknownOrReplayed);
}

#[tokio::test]
async fn test_receipt_failure_burns_nonce_by_default() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();
    let headers = h.signed_claim().await;

    h.receipts.set_fail_signing(true);
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::Internal);

    h.receipts.set_fail_signing(false);
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::NonceUnknownOrReplayed);
}

#[tokio::test]
async fn test_receipt_failure_refund_allows_retry() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary")))
        .policy(NonceFailurePolicy::Refund)
        .build();
    let headers = h.signed_claim().await;

    h.receipts.set_fail_signing(true);
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::Internal);

    h.receipts.set_fail_signing(false);
    let response = served(h.pay(&headers).await);
    assert!(ReceiptService::verify(&response.receipt));
    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::NonceUnknownOrReplayed);
}

#[tokio::test]
async fn test_identify_payer_needs_pending_nonce_and_valid_signature() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary"))).build();

    assert_eq!(h.gate.identify_payer(&PaymentHeaders::default()).await, None);

    let headers = h.signed_claim().await;
    assert_eq!(h.gate.identify_payer(&headers).await, Some(h.payer()));
    // identifying does not spend the nonce
    assert_eq!(h.gate.identify_payer(&headers).await, Some(h.payer()));

    let mut wrong_time = headers.clone();
    wrong_time.timestamp = Some("12345".to_string());
    assert_eq!(h.gate.identify_payer(&wrong_time).await, None);

    let ctx = terms().context("3f0c3c1e-8d55-4a7e-9a0b-1b2c3d4e5f60", Some(unix_now()));
    let unissued = claim_headers(&sign_context(&h.wallet, &ctx).unwrap(), &ctx);
    assert_eq!(h.gate.identify_payer(&unissued).await, None);

    served(h.pay(&headers).await);
    assert_eq!(h.gate.identify_payer(&headers).await, None);
}

#[tokio::test]
async fn test_compute_timeout_never_populates_cache() {
    let compute = Arc::new(FakeCompute::slow("late", Duration::from_millis(500)));
    let h = HarnessBuilder::new(compute)
        .compute_timeout(Duration::from_millis(50))
        .build();
    let headers = h.signed_claim().await;

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::DeadlineExceeded);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let key = cache_key("The quick brown fox jumps over the lazy dog.", "fake-model");
    assert!(h.cache.lookup(&key).await.is_none());
}

#[tokio::test]
async fn test_verifier_timeout_is_deadline_exceeded() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary")))
        .verifier(Arc::new(StuckVerifier))
        .verifier_timeout(Duration::from_millis(50))
        .build();
    let headers = h.signed_claim().await;

    assert_eq!(error_code(h.pay(&headers).await), ErrorCode::DeadlineExceeded);
    // verification never finished, so the nonce is still pending
    assert!(h.nonces.consume(headers.nonce.as_deref().unwrap()).await.unwrap());
}

#[tokio::test]
async fn test_verifier_outage_is_upstream_unavailable() {
    let h = HarnessBuilder::new(Arc::new(FakeCompute::ok("summary")))
        .verifier(Arc::new(DownVerifier))
        .build();
    let headers = h.signed_claim().await;

    let err = h.pay(&headers).await.unwrap_err();
    assert!(matches!(err, PaygateError::UpstreamUnavailable(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_double_spend_serves_once() {
    let compute = Arc::new(FakeCompute::ok("summary"));
    let h = Arc::new(HarnessBuilder::new(compute).build());
    let headers = h.signed_claim().await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let h = h.clone();
            let headers = headers.clone();
            tokio::spawn(async move { h.pay(&headers).await })
        })
        .collect();

    let mut served_count = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(GateOutcome::Served(_)) => served_count += 1,
            Err(PaygateError::NonceRejected) => replayed += 1,
            other => panic!("unexpected outcome {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(served_count, 1);
    assert_eq!(replayed, 15);
}
