use super::{ClientError, ClientResult};
use crate::ledger::verify_chain;
use crate::models::{ConversationSummary, Message, MessageType, VerificationReport};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

/// A file to upload with a message.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub receiver_id: String,
    pub receiver_name: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub sos_id: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    pub fn text(receiver_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            receiver_name: None,
            message_type: MessageType::Text,
            content: content.into(),
            sos_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_sos(mut self, sos_id: impl Into<String>) -> Self {
        self.sos_id = Some(sos_id.into());
        self
    }

    pub fn with_attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    fn into_form(self) -> ClientResult<Form> {
        let mut form = Form::new()
            .text("receiverId", self.receiver_id)
            .text("messageType", self.message_type.as_str())
            .text("content", self.content);
        if let Some(name) = self.receiver_name {
            form = form.text("receiverName", name);
        }
        if let Some(sos_id) = self.sos_id {
            form = form.text("sosId", sos_id);
        }
        for file in self.attachments {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)?;
            form = form.part("files", part);
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResult {
    pub message: Message,
    /// False when the message was already read.
    pub changed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountBody {
    unread_count: u64,
}

/// HTTP client for one authenticated participant.
#[derive(Clone)]
pub struct CommunicationClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CommunicationClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> ClientResult<Self> {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> ClientResult<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    /// Builds `{base}/seg/seg/...`, escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let envelope = serde_json::from_str::<ErrorResponse>(&body).unwrap_or_else(|_| {
            ErrorResponse::new(
                status.canonical_reason().unwrap_or("Error"),
                &body,
                status.as_u16(),
                kinds::SERVER_ERROR,
                error_codes::INTERNAL_SERVER_ERROR,
            )
        });
        tracing::debug!(status = status.as_u16(), code = %envelope.code, "ledger api error");
        Err(ClientError::Api(envelope))
    }

    /// POST /communication/send
    pub async fn send_message(&self, message: OutgoingMessage) -> ClientResult<Message> {
        let url = self.endpoint(&["communication", "send"])?;
        let form = message.into_form()?;
        let response = self
            .authorized(self.http.post(url))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// GET /communication/conversation/{partnerId}
    pub async fn conversation_with(&self, partner_id: &str) -> ClientResult<Vec<Message>> {
        let url = self.endpoint(&["communication", "conversation", partner_id])?;
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::decode(response).await
    }

    /// GET /communication/conversations
    pub async fn conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        let url = self.endpoint(&["communication", "conversations"])?;
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::decode(response).await
    }

    /// POST /communication/message/{id}/read
    pub async fn mark_read(&self, message_id: Uuid) -> ClientResult<MarkReadResult> {
        let id = message_id.to_string();
        let url = self.endpoint(&["communication", "message", &id, "read"])?;
        let response = self.authorized(self.http.post(url)).send().await?;
        Self::decode(response).await
    }

    /// GET /communication/unread-count
    pub async fn unread_count(&self) -> ClientResult<u64> {
        let url = self.endpoint(&["communication", "unread-count"])?;
        let response = self.authorized(self.http.get(url)).send().await?;
        let body: UnreadCountBody = Self::decode(response).await?;
        Ok(body.unread_count)
    }

    /// GET /communication/conversation/{conversationId}/verify
    pub async fn verify(&self, conversation_id: Uuid) -> ClientResult<VerificationReport> {
        let id = conversation_id.to_string();
        let url = self.endpoint(&["communication", "conversation", &id, "verify"])?;
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::decode(response).await
    }

    /// GET /communication/sos/{sosId}/audit
    pub async fn sos_audit(&self, sos_id: &str) -> ClientResult<Vec<Message>> {
        let url = self.endpoint(&["communication", "sos", sos_id, "audit"])?;
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::decode(response).await
    }

    /// Fetch the conversation with `partner_id` and walk its chain here
    /// instead of trusting the server's verdict. `None` when there are no
    /// messages yet.
    pub async fn verify_locally(&self, partner_id: &str) -> ClientResult<Option<VerificationReport>> {
        let messages = self.conversation_with(partner_id).await?;
        Ok(messages
            .first()
            .map(|first| verify_chain(first.conversation_id, &messages)))
    }

    pub async fn health(&self) -> bool {
        let Ok(url) = self.endpoint(&["health"]) else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_escape_segments() {
        let client = CommunicationClient::new("http://localhost:8080/api/", "t").unwrap();
        let url = client
            .endpoint(&["communication", "conversation", "bank 1/b"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/communication/conversation/bank%201%2Fb"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            CommunicationClient::new("mailto:ops@example.org", "t"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(CommunicationClient::new("not a url", "t").is_err());
    }

    #[test]
    fn outgoing_builder_collects_fields() {
        let msg = OutgoingMessage::text("hospital-1", "need O-").with_sos("sos-7");
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.sos_id.as_deref(), Some("sos-7"));
        assert!(msg.clone().into_form().is_ok());
    }
}
