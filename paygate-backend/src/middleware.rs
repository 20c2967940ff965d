use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use paygate_types::CORRELATION_ID_HEADER;

use crate::rate_limit::RateDecision;
use crate::x402::PaymentHeaders;
use crate::AppState;

/// Declared caller identity for tier classification. Honoured only when the
/// request's own payment signature recovers to the same address.
pub const WALLET_HEADER: &str = "X-Wallet-Address";

/// Caller's correlation id, or a fresh one.
pub fn correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_ip(req: &ServiceRequest, trust_proxy_headers: bool) -> Option<String> {
    if trust_proxy_headers {
        req.connection_info().realip_remote_addr().map(|s| s.to_string())
    } else {
        req.peer_addr().map(|addr| addr.ip().to_string())
    }
}

/// The declared wallet, only when this request's X-402 claim recovers to it.
/// Anything else is charged to the caller's IP.
async fn confirmed_wallet(req: &ServiceRequest, state: &AppState) -> Option<String> {
    let declared = req
        .headers()
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())?;

    let headers = PaymentHeaders::from_headers(req.headers());
    match state.gate.identify_payer(&headers).await {
        Some(payer) if payer.eq_ignore_ascii_case(&declared) => Some(payer),
        _ => {
            log::debug!("[RATE_LIMIT] Unconfirmed wallet {}, using IP bucket", declared);
            None
        }
    }
}

fn insert_rate_headers(headers: &mut actix_web::http::header::HeaderMap, decision: &RateDecision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(decision.reset_at),
    );
}

/// Token-bucket pre-check for metered routes. Runs before any payment logic.
pub async fn rate_limit(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let state = match req.app_data::<web::Data<AppState>>() {
        Some(state) if state.config.rate_limit.enabled => state.clone(),
        _ => return Ok(next.call(req).await?.map_into_left_body()),
    };

    let wallet = confirmed_wallet(&req, &state).await;
    let peer = client_ip(&req, state.rate_limiter.trust_proxy_headers());
    let (tier, key) = state.rate_limiter.classify(wallet.as_deref(), peer.as_deref());
    let decision = state.rate_limiter.check(tier, &key);

    if !decision.allowed {
        let mut response = HttpResponse::TooManyRequests().json(serde_json::json!({
            "error": "Too Many Requests",
            "details": "RateLimited",
            "message": format!("Rate limit exceeded, retry in {} seconds", decision.retry_after),
        }));
        let headers = response.headers_mut();
        insert_rate_headers(headers, &decision);
        headers.insert(
            actix_web::http::header::RETRY_AFTER,
            HeaderValue::from(decision.retry_after),
        );
        return Ok(req.into_response(response).map_into_right_body());
    }

    let mut res = next.call(req).await?;
    insert_rate_headers(res.headers_mut(), &decision);
    Ok(res.map_into_left_body())
}
