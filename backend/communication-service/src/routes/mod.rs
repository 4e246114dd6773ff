pub mod conversations;
pub mod messages;
pub mod sos;
pub mod wsroute;

use crate::metrics;
use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Register every endpoint of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(messages::send_message)
        .service(messages::get_conversation)
        .service(messages::mark_read)
        .service(messages::unread_count)
        .service(conversations::get_conversations)
        .service(conversations::verify_conversation)
        .service(sos::sos_audit)
        .service(wsroute::ws_handler)
        .service(health)
        .route("/metrics", web::get().to(metrics::metrics_handler));
}
