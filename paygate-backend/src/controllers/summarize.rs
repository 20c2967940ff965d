use actix_web::middleware::from_fn;
use actix_web::{web, HttpRequest, HttpResponse};
use base64::Engine;
use paygate_types::{CORRELATION_ID_HEADER, RECEIPT_HEADER};

use crate::error::PaygateError;
use crate::middleware::{correlation_id, rate_limit};
use crate::protocol::{GateOutcome, SUMMARIZE_ENDPOINT};
use crate::x402::{PaymentChallenge, PaymentHeaders};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(SUMMARIZE_ENDPOINT)
            .wrap(from_fn(rate_limit))
            .route(web::post().to(summarize)),
    );
}

async fn summarize(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, PaygateError> {
    let cid = correlation_id(&req);
    let headers = PaymentHeaders::from_headers(req.headers());

    match state.gate.handle(&headers, &body, &cid).await? {
        GateOutcome::Challenge(context) => Ok(HttpResponse::PaymentRequired()
            .insert_header((CORRELATION_ID_HEADER, cid))
            .json(PaymentChallenge::new(context))),
        GateOutcome::Served(served) => {
            let encoded = serde_json::to_vec(&served.receipt)
                .map_err(|e| PaygateError::Internal(format!("Failed to encode receipt: {}", e)))?;

            Ok(HttpResponse::Ok()
                .insert_header((RECEIPT_HEADER, base64::engine::general_purpose::STANDARD.encode(encoded)))
                .insert_header(("X-Cache", if served.cache_hit { "HIT" } else { "MISS" }))
                .insert_header((CORRELATION_ID_HEADER, cid))
                .json(serde_json::json!({
                    "result": served.result,
                    "receipt": served.receipt,
                })))
        }
    }
}
