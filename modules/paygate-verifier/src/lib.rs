//! x402 payment signature verification.
//!
//! Used in-process by the gateway and wrapped by the standalone `/verify`
//! service in `main.rs`.

pub mod eip712;
pub mod verify;

pub use eip712::{payment_digest, sign_context, PaymentDomain, PaymentMessage};
pub use verify::{recover, unix_now, validate_timestamp, TimeWindow, TimestampError, VerifyVerdict};
