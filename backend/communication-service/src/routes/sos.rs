use crate::error::AppError;
use crate::middleware::guards::AuthenticatedParticipant;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};

/// GET /communication/sos/{sosId}/audit
#[get("/communication/sos/{sos_id}/audit")]
pub async fn sos_audit(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .ledger
        .sos_audit(&participant, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}
