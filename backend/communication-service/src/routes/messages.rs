use crate::error::AppError;
use crate::middleware::guards::AuthenticatedParticipant;
use crate::models::{Message, MessageType, NewMessage};
use crate::services::message_service::validate_envelope;
use crate::services::UploadedFile;
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{get, post, web, HttpResponse};
use bytes::BytesMut;
use futures_util::stream::StreamExt;
use serde::Serialize;
use uuid::Uuid;

/// Ceiling for a plain (non-file) form field.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct SendForm {
    receiver_id: Option<String>,
    receiver_name: Option<String>,
    message_type: Option<String>,
    content: Option<String>,
    sos_id: Option<String>,
    files: Vec<UploadedFile>,
}

async fn read_text(field: &mut Field, name: &str) -> Result<String, AppError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::Validation(format!("reading {name}: {e}")))?;
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::Validation(format!("{name} is too large")));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf.to_vec())
        .map_err(|_| AppError::Validation(format!("{name} is not valid UTF-8")))
}

async fn read_form(state: &AppState, mut payload: Multipart) -> Result<SendForm, AppError> {
    let policy = state.attachments.policy();
    let mut form = SendForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?;
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        if let Some(file_name) = file_name {
            policy.check_count(form.files.len() + 1)?;
            policy.check_file_name(&file_name)?;
            let content_type = field
                .content_type()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());

            let mut buf = BytesMut::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk
                    .map_err(|e| AppError::Validation(format!("reading {file_name}: {e}")))?;
                policy.check_size(&file_name, buf.len() + chunk.len())?;
                buf.extend_from_slice(&chunk);
            }
            form.files.push(UploadedFile {
                file_name,
                content_type,
                bytes: buf.freeze(),
            });
            continue;
        }

        let value = read_text(&mut field, &name).await?;
        match name.as_str() {
            "receiverId" => form.receiver_id = Some(value),
            "receiverName" => form.receiver_name = Some(value),
            "messageType" => form.message_type = Some(value),
            "content" => form.content = Some(value),
            "sosId" => form.sos_id = Some(value).filter(|v| !v.trim().is_empty()),
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// POST /communication/send
///
/// Multipart form: `receiverId`, `messageType`, `content`, optional `sosId`
/// and `receiverName`, plus any number of file parts.
#[post("/communication/send")]
pub async fn send_message(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = read_form(&state, payload).await?;

    let receiver_id = form
        .receiver_id
        .ok_or_else(|| AppError::Validation("receiverId is required".into()))?;
    let message_type = match form.message_type.as_deref().map(str::trim) {
        None | Some("") => MessageType::Text,
        Some(raw) => raw.parse::<MessageType>().map_err(AppError::Validation)?,
    };

    // Reject a bad message before anything is written to blob storage.
    let mut new_message = NewMessage {
        sender: participant.0,
        receiver_id,
        receiver_name: form.receiver_name,
        message_type,
        content: form.content.unwrap_or_default(),
        attachments: Vec::new(),
        sos_id: form.sos_id,
    };
    validate_envelope(&new_message)?;
    if new_message.content.trim().is_empty() && form.files.is_empty() {
        return Err(AppError::Validation(
            "a message needs content or at least one attachment".into(),
        ));
    }
    new_message.attachments = state.attachments.store_all(form.files).await?;

    let message = state.ledger.append(new_message).await?;

    Ok(HttpResponse::Created().json(message))
}

/// GET /communication/conversation/{partnerId}
#[get("/communication/conversation/{partner_id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let partner_id = path.into_inner();
    let messages: Vec<Message> = state
        .ledger
        .conversation_with(&participant, &partner_id)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    message: Message,
    changed: bool,
}

/// POST /communication/message/{id}/read
#[post("/communication/message/{message_id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let outcome = state
        .ledger
        .mark_read(path.into_inner(), &participant)
        .await?;
    Ok(HttpResponse::Ok().json(MarkReadResponse {
        message: outcome.message,
        changed: outcome.changed,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountResponse {
    unread_count: u64,
}

/// GET /communication/unread-count
#[get("/communication/unread-count")]
pub async fn unread_count(
    state: web::Data<AppState>,
    participant: AuthenticatedParticipant,
) -> Result<HttpResponse, AppError> {
    let unread_count = state.ledger.unread_count(&participant).await?;
    Ok(HttpResponse::Ok().json(UnreadCountResponse { unread_count }))
}
