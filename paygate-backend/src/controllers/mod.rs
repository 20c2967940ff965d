pub mod health;
pub mod receipts;
pub mod summarize;

use actix_web::web;

/// Register every gateway route. Bodies over `max_body_bytes` get a 413.
pub fn configure(max_body_bytes: usize) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::PayloadConfig::new(max_body_bytes))
            .configure(health::config)
            .configure(summarize::config)
            .configure(receipts::config);
    }
}
