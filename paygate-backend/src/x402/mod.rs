//! x402 payment protocol, gateway side
//!
//! The gateway answers unpaid requests with a 402 challenge carrying a fresh
//! payment context, then checks the EIP-712 signature a client returns in the
//! X-402 headers through a [`VerifierBackend`].

mod types;
mod verifier;

pub use types::*;
pub use verifier::{LocalVerifier, RemoteVerifier, VerifierBackend};
