use crate::error::AppError;
use crate::middleware::guards::AuthenticatedParticipant;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use uuid::Uuid;

/// GET /communication/conversations
/// Caller's conversations, most recently active first
#[get("/communication/conversations")]
pub async fn get_conversations(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
) -> Result<HttpResponse, AppError> {
    let summaries = state.ledger.conversations(&participant).await?;
    Ok(HttpResponse::Ok().json(summaries))
}

/// GET /communication/conversation/{conversationId}/verify
///
/// A broken chain is still a 200 with `isValid: false`; the violation itself
/// is reported to admins and the logs.
#[get("/communication/conversation/{conversation_id}/verify")]
pub async fn verify_conversation(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let report = state
        .ledger
        .verify(&participant, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(report))
}
