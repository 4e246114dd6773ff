use crate::metrics;
use crate::models::{Message, VerificationReport};
use crate::websocket::{ConnectionRegistry, RealtimeEvent};

/// Pushes ledger events to live sessions. At most once, never replayed.
#[derive(Clone)]
pub struct RealtimeNotifier {
    registry: ConnectionRegistry,
}

impl RealtimeNotifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sender and receiver both hear about a new message.
    pub async fn message_appended(&self, message: &Message) -> usize {
        let event = RealtimeEvent::appended(message);
        let Some(payload) = Self::encode(&event) else {
            return 0;
        };

        let mut delivered = self.registry.send_to(&message.receiver_id, &payload).await;
        delivered += self.registry.send_to(&message.sender_id, &payload).await;
        metrics::record_realtime_event(event.event_type(), delivered);
        delivered
    }

    /// Read receipts go to the original sender only.
    pub async fn message_read(&self, message: &Message, reader_id: &str) -> usize {
        let event = RealtimeEvent::read(message, reader_id);
        let Some(payload) = Self::encode(&event) else {
            return 0;
        };

        let delivered = self.registry.send_to(&message.sender_id, &payload).await;
        metrics::record_realtime_event(event.event_type(), delivered);
        delivered
    }

    pub async fn integrity_violation(&self, report: &VerificationReport) -> usize {
        let event = RealtimeEvent::integrity_violation(report);
        let Some(payload) = Self::encode(&event) else {
            return 0;
        };

        let delivered = self.registry.send_to_admins(&payload).await;
        metrics::record_realtime_event(event.event_type(), delivered);
        delivered
    }

    fn encode(event: &RealtimeEvent) -> Option<String> {
        match event.to_payload() {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(event = event.event_type(), error = %e, "dropping realtime event");
                None
            }
        }
    }
}
