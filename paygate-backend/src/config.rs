use std::env;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;
use paygate_verifier::TimeWindow;

use crate::nonce::NonceFailurePolicy;
use crate::rate_limit::TierLimits;
use crate::x402::PaymentTerms;

pub const DEFAULT_RECIPIENT: &str = "0x2cAF48b4BA1C58721a85dFADa5aC01C2DFa62219";
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_OPENROUTER_MODEL: &str = "z-ai/glm-4.5-air:free";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifierMode {
    /// Recover signatures in-process
    Local,
    /// POST claims to a standalone verifier service
    Remote,
}

impl FromStr for VerifierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("VERIFIER_MODE must be 'local' or 'remote', got '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceStoreKind {
    Memory,
    Store,
}

impl FromStr for NonceStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "store" => Ok(Self::Store),
            other => Err(format!("NONCE_STORE must be 'memory' or 'store', got '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub anonymous: TierLimits,
    pub standard: TierLimits,
    pub verified: TierLimits,
    pub cleanup_interval: Duration,
    /// Lowercased wallet addresses granted the verified tier
    pub verified_wallets: Vec<String>,
    pub trust_proxy_headers: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub terms: PaymentTerms,
    pub window: TimeWindow,
    pub verifier_mode: VerifierMode,
    pub verifier_url: String,
    pub verifier_timeout: Duration,
    pub openrouter_api_key: Option<String>,
    pub openrouter_url: String,
    pub openrouter_model: String,
    pub ai_timeout: Duration,
    pub request_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
    pub server_wallet_private_key: Option<String>,
    pub receipt_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    pub nonce_failure_policy: NonceFailurePolicy,
    pub nonce_store: NonceStoreKind,
    pub cors_allowed_origin: String,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let window = TimeWindow {
            expiry_seconds: parse_or(&get, "SIGNATURE_EXPIRY_SECONDS", 300)?,
            clock_skew_seconds: parse_or(&get, "SIGNATURE_CLOCK_SKEW_SECONDS", 60)?,
        };

        let terms = PaymentTerms {
            recipient: or("RECIPIENT_ADDRESS", DEFAULT_RECIPIENT),
            token: or("PAYMENT_TOKEN", "USDC"),
            amount: or("PAYMENT_AMOUNT", "0.001"),
            chain_id: parse_or(&get, "CHAIN_ID", 8453)?,
        };

        let rate_limit = RateLimitConfig {
            enabled: parse_bool(&get, "RATE_LIMIT_ENABLED", true)?,
            anonymous: TierLimits::new(
                parse_or(&get, "RATE_LIMIT_ANONYMOUS_RPM", 10)?,
                parse_or(&get, "RATE_LIMIT_ANONYMOUS_BURST", 5)?,
            ),
            standard: TierLimits::new(
                parse_or(&get, "RATE_LIMIT_STANDARD_RPM", 60)?,
                parse_or(&get, "RATE_LIMIT_STANDARD_BURST", 20)?,
            ),
            verified: TierLimits::new(
                parse_or(&get, "RATE_LIMIT_VERIFIED_RPM", 300)?,
                parse_or(&get, "RATE_LIMIT_VERIFIED_BURST", 50)?,
            ),
            cleanup_interval: Duration::from_secs(parse_or(&get, "RATE_LIMIT_CLEANUP_SECONDS", 600)?),
            verified_wallets: get("VERIFIED_WALLETS")
                .map(|list| {
                    list.split(',')
                        .map(|w| w.trim().to_lowercase())
                        .filter(|w| !w.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            trust_proxy_headers: parse_bool(&get, "TRUST_PROXY_HEADERS", false)?,
        };

        Ok(Self {
            port: parse_or(&get, "PORT", 3000)?,
            terms,
            window,
            verifier_mode: or("VERIFIER_MODE", "local").parse()?,
            verifier_url: or("VERIFIER_URL", "http://127.0.0.1:3002"),
            verifier_timeout: Duration::from_millis(parse_or(&get, "VERIFIER_TIMEOUT_MS", 2000)?),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_url: or("OPENROUTER_URL", DEFAULT_OPENROUTER_URL),
            openrouter_model: or("OPENROUTER_MODEL", DEFAULT_OPENROUTER_MODEL),
            ai_timeout: Duration::from_secs(parse_or(&get, "AI_TIMEOUT_SECONDS", 30)?),
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECONDS", 60)?),
            cache_enabled: parse_bool(&get, "CACHE_ENABLED", true)?,
            cache_ttl: Duration::from_secs(parse_or(&get, "CACHE_TTL_SECONDS", 3600)?),
            cache_max_entries: parse_or(&get, "CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES)?,
            server_wallet_private_key: get("SERVER_WALLET_PRIVATE_KEY"),
            receipt_ttl: Duration::from_secs(parse_or(&get, "RECEIPT_TTL_SECONDS", 86400)?),
            rate_limit,
            nonce_failure_policy: or("NONCE_FAILURE_POLICY", "burn").parse()?,
            nonce_store: or("NONCE_STORE", "memory").parse()?,
            cors_allowed_origin: or("CORS_ALLOWED_ORIGIN", "http://localhost:3001"),
            max_body_bytes: parse_or(&get, "MAX_REQUEST_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        })
    }

    /// Checks that cannot be expressed as a default: required secrets and
    /// values the payment flow would otherwise fail on at request time.
    pub fn validate(&self) -> Result<(), String> {
        if self.openrouter_api_key.is_none() {
            return Err("OPENROUTER_API_KEY must be set".to_string());
        }
        if self.terms.recipient.parse::<Address>().is_err() {
            return Err(format!(
                "RECIPIENT_ADDRESS is not a valid address: {}",
                self.terms.recipient
            ));
        }
        if self.request_timeout.is_zero() {
            return Err("REQUEST_TIMEOUT_SECONDS must be greater than zero".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("MAX_REQUEST_BODY_BYTES must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be a valid number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, String>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(format!("{} must be true or false, got '{}'", key, v)),
    }
}
