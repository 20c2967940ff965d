//! Paygate Verifier: standalone EIP-712 signature verification service.
//!
//! Default: http://0.0.0.0:3002/

mod routes;

use paygate_verifier::TimeWindow;
use routes::AppState;
use std::sync::Arc;

const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let port: u16 = std::env::var("VERIFIER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3002);

    let max_body_bytes: usize = std::env::var("MAX_REQUEST_BODY_BYTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);

    let window = TimeWindow::from_env();
    log::info!(
        "Signature window: expiry={}s clock_skew={}s",
        window.expiry_seconds,
        window.clock_skew_seconds
    );

    let state = Arc::new(AppState {
        window,
        max_body_bytes,
    });

    let app = routes::router(state).layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", port);
    log::info!("Paygate Verifier listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
