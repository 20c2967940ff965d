use actix_web::{web, HttpResponse};

use crate::error::PaygateError;
use crate::receipts::ReceiptService;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/receipts/{id}").route(web::get().to(get_receipt)));
}

async fn get_receipt(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, PaygateError> {
    let id = path.into_inner();

    let signed = match state.gate.receipts().lookup(&id).await {
        Ok(Some(signed)) => signed,
        Ok(None) => return Err(PaygateError::ReceiptNotFound(id)),
        Err(e) => {
            log::error!("[RECEIPT] Lookup of {} failed: {}", id, e);
            return Err(PaygateError::UpstreamUnavailable(e));
        }
    };

    let status = if ReceiptService::verify(&signed) { "valid" } else { "invalid" };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "receipt": signed.receipt,
        "signature": signed.signature,
        "server_public_key": signed.server_public_key,
        "status": status,
    })))
}
