use crate::models::ParticipantType;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod message_types;

pub use events::RealtimeEvent;

/// Identifies one live socket, so closing it removes exactly that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    participant_type: ParticipantType,
    sender: UnboundedSender<String>,
}

/// Live realtime sessions, keyed by participant id.
///
/// A participant may hold several sessions (tabs, devices); each gets its own
/// channel. Constructed once at startup and shared through `AppState`.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscriber(
        &self,
        participant_id: &str,
        participant_type: ParticipantType,
    ) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        let sessions = guard.entry(participant_id.to_string()).or_default();
        sessions.push(Subscriber {
            id: subscriber_id,
            participant_type,
            sender: tx,
        });

        tracing::debug!(
            participant_id,
            ?subscriber_id,
            sessions = sessions.len(),
            "realtime session registered"
        );

        (subscriber_id, rx)
    }

    pub async fn remove_subscriber(&self, participant_id: &str, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(sessions) = guard.get_mut(participant_id) {
            sessions.retain(|s| s.id != subscriber_id);
            tracing::debug!(
                participant_id,
                ?subscriber_id,
                remaining = sessions.len(),
                "realtime session removed"
            );
            if sessions.is_empty() {
                guard.remove(participant_id);
            }
        }
    }

    /// Deliver `payload` to every session of `participant_id`, pruning dead
    /// channels. Returns the number of sessions reached.
    pub async fn send_to(&self, participant_id: &str, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let Some(sessions) = guard.get_mut(participant_id) else {
            return 0;
        };

        sessions.retain(|s| s.sender.send(payload.to_string()).is_ok());
        let delivered = sessions.len();
        if sessions.is_empty() {
            guard.remove(participant_id);
        }
        delivered
    }

    /// Deliver `payload` to every admin session.
    pub async fn send_to_admins(&self, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let mut delivered = 0;

        for sessions in guard.values_mut() {
            sessions.retain(|s| {
                if s.participant_type != ParticipantType::Admin {
                    return true;
                }
                let ok = s.sender.send(payload.to_string()).is_ok();
                if ok {
                    delivered += 1;
                }
                ok
            });
        }
        guard.retain(|_, sessions| !sessions.is_empty());
        delivered
    }

    pub async fn subscriber_count(&self, participant_id: &str) -> usize {
        let guard = self.inner.read().await;
        guard.get(participant_id).map(|v| v.len()).unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.values().map(|v| v.len()).sum()
    }
}
