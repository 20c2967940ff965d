//! x402 payment gateway.
//!
//! Metered requests are answered with a 402 payment challenge, admitted once
//! a signed claim verifies and its nonce is consumed, served from cache or
//! the compute provider, and returned with a signed receipt.

pub mod cache;
pub mod compute;
pub mod config;
pub mod controllers;
pub mod error;
pub mod http;
pub mod middleware;
pub mod nonce;
pub mod protocol;
pub mod rate_limit;
pub mod receipts;
pub mod store;
pub mod tasks;
pub mod x402;

#[cfg(test)]
mod protocol_tests;

use std::sync::Arc;
use std::time::Duration;

use config::{Config, NonceStoreKind, VerifierMode};
use protocol::{GateSettings, GateTimeouts, PaymentGate, SUMMARIZE_ENDPOINT};

/// How often expired nonces are purged from the in-memory registry.
const NONCE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct AppState {
    pub config: Config,
    pub gate: Arc<PaymentGate>,
    pub rate_limiter: Arc<rate_limit::RateLimiter>,
    pub stores: store::Stores,
}

impl AppState {
    /// Wire every component from configuration. Must run inside a tokio
    /// runtime because the registries start their sweepers here.
    pub fn from_config(config: Config) -> Result<Self, String> {
        let api_key = config
            .openrouter_api_key
            .clone()
            .ok_or_else(|| "OPENROUTER_API_KEY must be set".to_string())?;
        let compute: Arc<dyn compute::ComputeProvider> = Arc::new(compute::OpenRouterClient::new(
            &api_key,
            &config.openrouter_url,
            &config.openrouter_model,
            config.ai_timeout,
        )?);
        Self::with_compute(config, compute)
    }

    pub fn with_compute(config: Config, compute: Arc<dyn compute::ComputeProvider>) -> Result<Self, String> {
        let stores = store::Stores::in_memory(config.cache_max_entries);
        let lifetime = config.window.nonce_lifetime_seconds();

        let nonces: Arc<dyn nonce::NonceRegistry> = match config.nonce_store {
            NonceStoreKind::Memory => {
                let registry = Arc::new(nonce::MemoryNonceRegistry::new(config.terms.clone(), lifetime));
                registry.start_sweeper(NONCE_SWEEP_INTERVAL);
                registry
            }
            NonceStoreKind::Store => Arc::new(nonce::StoreNonceRegistry::new(
                config.terms.clone(),
                lifetime,
                stores.durable.clone(),
            )),
        };

        let verifier: Arc<dyn x402::VerifierBackend> = match config.verifier_mode {
            VerifierMode::Local => Arc::new(x402::LocalVerifier::new(config.window)),
            VerifierMode::Remote => Arc::new(x402::RemoteVerifier::new(
                &config.verifier_url,
                config.verifier_timeout,
            )),
        };

        let cache = Arc::new(cache::ResponseCache::new(
            stores.cache.clone(),
            config.cache_ttl,
            config.cache_enabled,
        ));

        let receipts = match &config.server_wallet_private_key {
            Some(key) => receipts::ReceiptService::new(key, stores.durable.clone(), config.receipt_ttl)?,
            None => {
                log::warn!("[RECEIPT] SERVER_WALLET_PRIVATE_KEY not set, signing receipts with an ephemeral key");
                receipts::ReceiptService::ephemeral(stores.durable.clone(), config.receipt_ttl)
            }
        };
        log::info!("[RECEIPT] Signing as {}", receipts.address());

        let gate = PaymentGate::new(
            GateSettings {
                terms: config.terms.clone(),
                window: config.window,
                timeouts: GateTimeouts {
                    request: config.request_timeout,
                    verifier: config.verifier_timeout,
                    compute: config.ai_timeout,
                },
                failure_policy: config.nonce_failure_policy,
                endpoint: SUMMARIZE_ENDPOINT.to_string(),
            },
            nonces,
            verifier,
            cache,
            compute,
            Arc::new(receipts),
        );

        let rate_limiter = Arc::new(rate_limit::RateLimiter::new(&config.rate_limit));
        if config.rate_limit.enabled {
            rate_limiter.start_sweeper();
        }

        Ok(Self {
            config,
            gate: Arc::new(gate),
            rate_limiter,
            stores,
        })
    }

    /// Stop background sweepers and wait for them to exit.
    pub async fn shutdown(&self) {
        self.rate_limiter.shutdown().await;
        self.gate.shutdown().await;
    }
}
