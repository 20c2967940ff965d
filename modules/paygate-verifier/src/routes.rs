//! Axum route handlers for the verifier service.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use paygate_types::{
    HealthResponse, VerifyErrorCode, VerifyRequest, VerifyResponse, CORRELATION_ID_HEADER,
};
use paygate_verifier::{recover, unix_now, TimeWindow};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

pub struct AppState {
    pub window: TimeWindow,
    pub max_body_bytes: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/verify", post(verify_signature))
        .with_state(state)
        .layer(DefaultBodyLimit::max(limit))
        .layer(RequestBodyLimitLayer::new(limit))
}

/// Echo the caller's correlation id, or `unknown` when none was sent.
fn correlation_id_headers(headers: &HeaderMap) -> (String, HeaderMap) {
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let mut res_headers = HeaderMap::new();
    if let Ok(val) = HeaderValue::from_str(correlation_id) {
        res_headers.insert(CORRELATION_ID_HEADER, val);
    }

    (correlation_id.to_string(), res_headers)
}

// GET /health
pub async fn health(headers: HeaderMap) -> (HeaderMap, Json<HealthResponse>) {
    let (_, res_headers) = correlation_id_headers(&headers);
    (
        res_headers,
        Json(HealthResponse {
            status: "healthy".to_string(),
            service: "verifier".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

// POST /verify
pub async fn verify_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> (StatusCode, HeaderMap, Json<VerifyResponse>) {
    let (cid, res_headers) = correlation_id_headers(&headers);

    let req = match payload {
        Ok(Json(req)) => req,
        Err(JsonRejection::BytesRejection(_)) => {
            log::warn!("[VERIFIER] [CID: {}] Rejected: payload too large", cid);
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                res_headers,
                Json(VerifyResponse {
                    is_valid: false,
                    recovered_address: None,
                    error: Some(format!(
                        "Request body too large (max {} bytes)",
                        state.max_body_bytes
                    )),
                    code: None,
                }),
            );
        }
        Err(e) => {
            log::warn!("[VERIFIER] [CID: {}] Rejected: invalid JSON", cid);
            return (
                StatusCode::BAD_REQUEST,
                res_headers,
                Json(VerifyResponse {
                    is_valid: false,
                    recovered_address: None,
                    error: Some(format!("Invalid request: {}", e)),
                    code: None,
                }),
            );
        }
    };

    log::info!("[VERIFIER] [CID: {}] Verify nonce={}", cid, req.context.nonce);

    let verdict = recover(&req.context, &req.signature, &state.window, unix_now());

    // Undecodable input is a client error; a well-formed claim that fails
    // the window or recovery is a normal negative verdict.
    let status = match verdict.error_code {
        Some(VerifyErrorCode::MalformedSignature) | Some(VerifyErrorCode::InvalidContext) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::OK,
    };

    if let Some(code) = verdict.error_code {
        log::info!("[VERIFIER] [CID: {}] Rejected nonce={}: {}", cid, req.context.nonce, code);
    }

    (status, res_headers, Json(verdict.into()))
}
