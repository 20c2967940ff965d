//! Error taxonomy for the gateway.
//!
//! Every failure a client can observe maps onto one stable [`ErrorCode`]
//! identifier and one HTTP status. Internal helpers return `Result<T, String>`
//! at their I/O edges; the orchestrator converts those into [`PaygateError`].

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use paygate_types::VerifyErrorCode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    MissingChallenge,
    MalformedSignature,
    RecoveryFailed,
    NonceUnknownOrReplayed,
    SignatureExpired,
    SignatureFuture,
    MissingTimestamp,
    RateLimited,
    UpstreamUnavailable,
    DeadlineExceeded,
    ReceiptNotFound,
    InvalidRequest,
    InvalidContext,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingChallenge => "MissingChallenge",
            ErrorCode::MalformedSignature => "MalformedSignature",
            ErrorCode::RecoveryFailed => "RecoveryFailed",
            ErrorCode::NonceUnknownOrReplayed => "NonceUnknownOrReplayed",
            ErrorCode::SignatureExpired => "SignatureExpired",
            ErrorCode::SignatureFuture => "SignatureFuture",
            ErrorCode::MissingTimestamp => "MissingTimestamp",
            ErrorCode::RateLimited => "RateLimited",
            ErrorCode::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorCode::DeadlineExceeded => "DeadlineExceeded",
            ErrorCode::ReceiptNotFound => "ReceiptNotFound",
            ErrorCode::InvalidRequest => "InvalidRequest",
            ErrorCode::InvalidContext => "InvalidContext",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VerifyErrorCode> for ErrorCode {
    fn from(code: VerifyErrorCode) -> Self {
        match code {
            VerifyErrorCode::InvalidContext => ErrorCode::InvalidContext,
            VerifyErrorCode::MalformedSignature => ErrorCode::MalformedSignature,
            VerifyErrorCode::RecoveryFailed => ErrorCode::RecoveryFailed,
            VerifyErrorCode::SignatureExpired => ErrorCode::SignatureExpired,
            VerifyErrorCode::SignatureFuture => ErrorCode::SignatureFuture,
            VerifyErrorCode::MissingTimestamp => ErrorCode::MissingTimestamp,
        }
    }
}

#[derive(Debug)]
pub enum PaygateError {
    /// The signature did not verify against the reconstructed context
    Verification { code: ErrorCode, message: String },
    /// The nonce was never issued, already used, or has expired
    NonceRejected,
    MissingTimestamp,
    /// Malformed body or header value
    InvalidRequest(String),
    /// Verifier, store or compute provider failed
    UpstreamUnavailable(String),
    DeadlineExceeded(String),
    ReceiptNotFound(String),
    Internal(String),
}

impl PaygateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PaygateError::Verification { code, .. } => *code,
            PaygateError::NonceRejected => ErrorCode::NonceUnknownOrReplayed,
            PaygateError::MissingTimestamp => ErrorCode::MissingTimestamp,
            PaygateError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            PaygateError::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            PaygateError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            PaygateError::ReceiptNotFound(_) => ErrorCode::ReceiptNotFound,
            PaygateError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            PaygateError::Verification { code: ErrorCode::InvalidContext, .. } => "Invalid Payment Context",
            PaygateError::Verification { .. } => "Invalid Signature",
            PaygateError::NonceRejected => "Invalid Nonce",
            PaygateError::MissingTimestamp => "Missing Timestamp",
            PaygateError::InvalidRequest(_) => "Invalid Request",
            PaygateError::UpstreamUnavailable(_) => "Service Unavailable",
            PaygateError::DeadlineExceeded(_) => "Request Timeout",
            PaygateError::ReceiptNotFound(_) => "Receipt Not Found",
            PaygateError::Internal(_) => "Internal Server Error",
        }
    }

    /// Message shown to the client. Upstream and internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            PaygateError::Verification { message, .. } => message.clone(),
            PaygateError::NonceRejected => "Nonce is unknown, expired or already used".to_string(),
            PaygateError::MissingTimestamp => {
                "X-402-Timestamp header is required with a signed request".to_string()
            }
            PaygateError::InvalidRequest(msg) => msg.clone(),
            PaygateError::UpstreamUnavailable(_) => {
                "An upstream service is unavailable, please retry later".to_string()
            }
            PaygateError::DeadlineExceeded(_) => "The request did not complete in time".to_string(),
            PaygateError::ReceiptNotFound(id) => format!("Receipt {} not found or expired", id),
            PaygateError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl std::fmt::Display for PaygateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaygateError::Verification { code, message } => {
                write!(f, "Verification failed ({}): {}", code, message)
            }
            PaygateError::NonceRejected => write!(f, "Nonce unknown or replayed"),
            PaygateError::MissingTimestamp => write!(f, "Missing X-402-Timestamp header"),
            PaygateError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            PaygateError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            PaygateError::DeadlineExceeded(stage) => write!(f, "Deadline exceeded during {}", stage),
            PaygateError::ReceiptNotFound(id) => write!(f, "Receipt not found: {}", id),
            PaygateError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for PaygateError {}

impl ResponseError for PaygateError {
    fn status_code(&self) -> StatusCode {
        match self {
            PaygateError::Verification { code: ErrorCode::InvalidContext, .. } => StatusCode::BAD_REQUEST,
            PaygateError::Verification { .. } | PaygateError::NonceRejected => StatusCode::FORBIDDEN,
            PaygateError::MissingTimestamp | PaygateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PaygateError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            PaygateError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            PaygateError::ReceiptNotFound(_) => StatusCode::NOT_FOUND,
            PaygateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.title(),
            "details": self.code(),
            "message": self.public_message(),
        }))
    }
}
