use actix_cors::Cors;
use actix_web::{middleware::Compress, middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use paygate_backend::config::Config;
use paygate_backend::middleware::WALLET_HEADER;
use paygate_backend::{controllers, AppState};
use paygate_types::{CORRELATION_ID_HEADER, NONCE_HEADER, RECEIPT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = match Config::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    let max_body_bytes = config.max_body_bytes;
    let cors_origin = config.cors_allowed_origin.clone();

    log::info!(
        "Charging {} {} on chain {} to {}",
        config.terms.amount,
        config.terms.token,
        config.terms.chain_id,
        config.terms.recipient
    );
    log::info!(
        "Verifier mode: {:?}, nonce store: {:?}, failure policy: {}",
        config.verifier_mode,
        config.nonce_store,
        config.nonce_failure_policy
    );

    let state = match AppState::from_config(config) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("Failed to initialize gateway: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Starting Paygate gateway on port {}", port);

    let app_state = state.clone();
    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&cors_origin)
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                "Content-Type",
                "Authorization",
                SIGNATURE_HEADER,
                NONCE_HEADER,
                TIMESTAMP_HEADER,
                CORRELATION_ID_HEADER,
                WALLET_HEADER,
            ])
            .expose_headers(vec![
                RECEIPT_HEADER,
                CORRELATION_ID_HEADER,
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
                "Retry-After",
            ])
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(Compress::default())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::configure(max_body_bytes))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await;

    log::info!("Shutting down background tasks");
    state.shutdown().await;

    result
}
