use super::message_service::LedgerService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically re-verify every conversation. Violations go through the same
/// reporting path as on-demand verification.
pub fn spawn_chain_auditor(service: Arc<LedgerService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; let startup settle.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match service.audit_all().await {
                Ok(reports) => {
                    let broken = reports.iter().filter(|r| !r.is_valid).count();
                    tracing::info!(
                        conversations = reports.len(),
                        broken,
                        "chain audit finished"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "chain audit failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerStore, MemoryLedgerStore};
    use crate::models::{MessageType, NewMessage, ParticipantProfile, ParticipantType};
    use crate::services::{ConversationIndex, RealtimeNotifier, RetryPolicy};
    use crate::websocket::ConnectionRegistry;

    #[tokio::test]
    async fn auditor_reports_tampering_to_admins() {
        let store = Arc::new(MemoryLedgerStore::new());
        let registry = ConnectionRegistry::new();
        let service = Arc::new(LedgerService::new(
            store.clone(),
            Arc::new(ConversationIndex::new()),
            RealtimeNotifier::new(registry.clone()),
            RetryPolicy::default(),
        ));
        let bank = ParticipantProfile::new("bank-1", "Bank", ParticipantType::Bloodbank);
        let first = service
            .append(NewMessage {
                sender: bank.clone(),
                receiver_id: "hospital-1".into(),
                receiver_name: None,
                message_type: MessageType::Text,
                content: "units".into(),
                attachments: vec![],
                sos_id: None,
            })
            .await
            .unwrap();
        store
            .overwrite_raw(first.id, |m| m.content = "forged".into())
            .await;
        assert_eq!(store.conversation_ids().await.unwrap().len(), 1);

        let (_, mut admin_rx) = registry
            .add_subscriber("admin-1", ParticipantType::Admin)
            .await;
        let handle = spawn_chain_auditor(service, Duration::from_millis(10));

        let payload = tokio::time::timeout(Duration::from_secs(2), admin_rx.recv())
            .await
            .expect("auditor never reported")
            .unwrap();
        assert!(payload.contains("ledger.integrity_violation"));
        handle.abort();
    }
}
