//! Signature recovery and timestamp window checks.
//!
//! Everything here is a pure function of its inputs (including `now`), so the
//! gateway can call it in-process and the standalone service can wrap it.

use chrono::Utc;
use ethers::types::Signature;
use paygate_types::{PaymentContext, VerifyErrorCode, VerifyResponse};

use crate::eip712::payment_digest;

/// Accepted signing-time window around `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Oldest accepted signature age
    pub expiry_seconds: u64,
    /// How far in the future a client clock may run
    pub clock_skew_seconds: u64,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            expiry_seconds: 300,
            clock_skew_seconds: 60,
        }
    }
}

impl TimeWindow {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            expiry_seconds: env_u64("SIGNATURE_EXPIRY_SECONDS", defaults.expiry_seconds),
            clock_skew_seconds: env_u64("SIGNATURE_CLOCK_SKEW_SECONDS", defaults.clock_skew_seconds),
        }
    }

    /// How long an issued nonce stays usable.
    pub fn nonce_lifetime_seconds(&self) -> u64 {
        self.expiry_seconds.saturating_add(self.clock_skew_seconds)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    Expired { age_seconds: u64, max_seconds: u64 },
    Future { timestamp: u64, now: u64 },
    Missing,
}

impl TimestampError {
    pub fn code(&self) -> VerifyErrorCode {
        match self {
            TimestampError::Expired { .. } => VerifyErrorCode::SignatureExpired,
            TimestampError::Future { .. } => VerifyErrorCode::SignatureFuture,
            TimestampError::Missing => VerifyErrorCode::MissingTimestamp,
        }
    }
}

impl std::fmt::Display for TimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestampError::Expired { age_seconds, max_seconds } => {
                write!(f, "signature expired (age={} max={})", age_seconds, max_seconds)
            }
            TimestampError::Future { timestamp, now } => {
                write!(f, "signature timestamp in the future (ts={} now={})", timestamp, now)
            }
            TimestampError::Missing => write!(f, "missing timestamp"),
        }
    }
}

pub fn validate_timestamp(
    timestamp: Option<u64>,
    window: &TimeWindow,
    now: u64,
) -> Result<(), TimestampError> {
    let ts = timestamp.ok_or(TimestampError::Missing)?;

    if ts > now.saturating_add(window.clock_skew_seconds) {
        return Err(TimestampError::Future { timestamp: ts, now });
    }

    let age = now.saturating_sub(ts);
    if age > window.expiry_seconds {
        return Err(TimestampError::Expired {
            age_seconds: age,
            max_seconds: window.expiry_seconds,
        });
    }

    Ok(())
}

/// Outcome of one verification call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyVerdict {
    pub valid: bool,
    pub recovered_address: Option<String>,
    pub error_code: Option<VerifyErrorCode>,
    pub message: Option<String>,
}

impl VerifyVerdict {
    fn accept(address: String) -> Self {
        Self {
            valid: true,
            recovered_address: Some(address),
            error_code: None,
            message: None,
        }
    }

    fn reject(code: VerifyErrorCode, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            recovered_address: None,
            error_code: Some(code),
            message: Some(message.into()),
        }
    }
}

impl From<VerifyVerdict> for VerifyResponse {
    fn from(v: VerifyVerdict) -> Self {
        VerifyResponse {
            is_valid: v.valid,
            recovered_address: v.recovered_address,
            error: v.message,
            code: v.error_code,
        }
    }
}

impl From<VerifyResponse> for VerifyVerdict {
    fn from(r: VerifyResponse) -> Self {
        // A remote verdict that claims validity without an address is unusable
        let valid = r.is_valid && r.recovered_address.is_some();
        let error_code = match (valid, r.code) {
            (true, _) => None,
            (false, Some(code)) => Some(code),
            (false, None) => Some(VerifyErrorCode::RecoveryFailed),
        };
        VerifyVerdict {
            valid,
            recovered_address: if valid { r.recovered_address } else { None },
            error_code,
            message: r.error,
        }
    }
}

/// Decode a hex signature (with or without `0x`) into r, s, v.
pub fn parse_signature(signature: &str) -> Result<Signature, String> {
    let hex_str = signature.trim();
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).map_err(|e| format!("signature is not hex: {}", e))?;
    if bytes.len() != 65 {
        return Err(format!("signature must be 65 bytes, got {}", bytes.len()));
    }
    Signature::try_from(bytes.as_slice()).map_err(|e| format!("bad signature: {}", e))
}

/// Recover the payer of a signed payment context.
///
/// Check order: timestamp window, typed-data construction, signature decoding,
/// then public-key recovery.
pub fn recover(
    ctx: &PaymentContext,
    signature: &str,
    window: &TimeWindow,
    now: u64,
) -> VerifyVerdict {
    if let Err(e) = validate_timestamp(ctx.timestamp, window, now) {
        return VerifyVerdict::reject(e.code(), e.to_string());
    }

    let digest = match payment_digest(ctx) {
        Ok(d) => d,
        Err(e) => return VerifyVerdict::reject(VerifyErrorCode::InvalidContext, e),
    };

    let sig = match parse_signature(signature) {
        Ok(s) => s,
        Err(e) => return VerifyVerdict::reject(VerifyErrorCode::MalformedSignature, e),
    };

    match sig.recover(digest) {
        Ok(address) => VerifyVerdict::accept(format!("{:?}", address).to_lowercase()),
        Err(e) => VerifyVerdict::reject(VerifyErrorCode::RecoveryFailed, e.to_string()),
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
