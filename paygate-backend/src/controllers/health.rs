use actix_web::http::header::ContentEncoding;
use actix_web::{web, HttpResponse, Responder};

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/healthz").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/version").route(web::get().to(get_version)));
    cfg.service(web::resource("/api/health/config").route(web::get().to(get_config_status)));
}

async fn health_check() -> impl Responder {
    // probes read this uncompressed
    HttpResponse::Ok()
        .insert_header(ContentEncoding::Identity)
        .json(serde_json::json!({
            "status": "ok",
            "service": "gateway"
        }))
}

async fn get_version() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "version": VERSION
    }))
}

async fn get_config_status(state: web::Data<AppState>) -> impl Responder {
    let terms = state.gate.terms();

    HttpResponse::Ok().json(serde_json::json!({
        "recipient": terms.recipient,
        "token": terms.token,
        "amount": terms.amount,
        "chain_id": terms.chain_id,
        "verifier_mode": state.gate.verifier_mode(),
        "nonce_store": state.gate.nonce_backend(),
        "nonce_failure_policy": state.config.nonce_failure_policy.to_string(),
        "cache_enabled": state.config.cache_enabled,
        "cache_store": state.stores.cache.backend_name(),
        "durable_store": state.stores.durable.backend_name(),
        "rate_limit_enabled": state.config.rate_limit.enabled,
        "receipt_public_key": state.gate.receipts().public_key(),
        "compute_configured": state.config.openrouter_api_key.is_some(),
    }))
}
