use super::realtime::{ClientEvent, ListenerId, RealtimeClient};
use crate::websocket::events::{
    RealtimeEvent, CONNECTION_RESTORED, INTEGRITY_VIOLATION, MESSAGE_APPENDED, MESSAGE_READ,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// A piece of client state that should be refetched over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Conversations,
    Conversation(Uuid),
    UnreadCount,
    /// After a reconnect or a poll tick nothing cached can be trusted.
    Everything,
}

/// Turns pushes and poll ticks into [`Invalidation`]s.
///
/// Realtime delivery is best effort, so the periodic poll is what actually
/// guarantees a client converges.
pub struct Reconciler {
    tx: broadcast::Sender<Invalidation>,
}

impl Reconciler {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }

    /// What `event` makes stale.
    pub fn invalidations_for(event: &ClientEvent) -> Vec<Invalidation> {
        match event {
            ClientEvent::ConnectionRestored => vec![Invalidation::Everything],
            ClientEvent::Ledger(frame) => match &frame.event {
                RealtimeEvent::MessageAppended {
                    conversation_id, ..
                } => vec![
                    Invalidation::Conversation(*conversation_id),
                    Invalidation::Conversations,
                    Invalidation::UnreadCount,
                ],
                RealtimeEvent::MessageRead {
                    conversation_id, ..
                }
                | RealtimeEvent::IntegrityViolation {
                    conversation_id, ..
                } => vec![Invalidation::Conversation(*conversation_id)],
            },
        }
    }

    /// Returns how many receivers saw the notices.
    pub fn on_event(&self, event: &ClientEvent) -> usize {
        Self::invalidations_for(event)
            .into_iter()
            .map(|inv| self.tx.send(inv).unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    /// Subscribe to every event the realtime client can produce.
    pub fn attach(self: &Arc<Self>, realtime: &RealtimeClient) -> Vec<(&'static str, ListenerId)> {
        [MESSAGE_APPENDED, MESSAGE_READ, INTEGRITY_VIOLATION, CONNECTION_RESTORED]
            .into_iter()
            .map(|event| {
                let this = Arc::clone(self);
                let id = realtime.subscribe(event, move |e| {
                    this.on_event(e);
                });
                (event, id)
            })
            .collect()
    }

    /// Emit [`Invalidation::Everything`] every `every`.
    pub fn spawn_poller(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = this.tx.send(Invalidation::Everything);
            }
        })
    }
}
