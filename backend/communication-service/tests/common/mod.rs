#![allow(dead_code)]

use communication_service::{
    config::Config,
    ledger::{LedgerStore, MemoryLedgerStore},
    models::{MessageType, NewMessage, ParticipantProfile, ParticipantType},
    services::{BlobStore, MemoryBlobStore},
    state::AppState,
};
use std::sync::Arc;

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryLedgerStore>,
    pub blobs: Arc<MemoryBlobStore>,
}

pub fn test_app() -> TestApp {
    test_app_with(Config::test_defaults())
}

pub fn test_app_with(config: Config) -> TestApp {
    let store = Arc::new(MemoryLedgerStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let state = AppState::new(
        Arc::new(config),
        store.clone() as Arc<dyn LedgerStore>,
        blobs.clone() as Arc<dyn BlobStore>,
    );
    TestApp {
        state,
        store,
        blobs,
    }
}

pub fn blood_bank() -> ParticipantProfile {
    ParticipantProfile::new("BB1", "Central Blood Bank", ParticipantType::Bloodbank)
}

pub fn hospital() -> ParticipantProfile {
    ParticipantProfile::new("H1", "St. Mary Hospital", ParticipantType::Hospital)
}

pub fn other_hospital() -> ParticipantProfile {
    ParticipantProfile::new("H2", "General Hospital", ParticipantType::Hospital)
}

pub fn admin() -> ParticipantProfile {
    ParticipantProfile::new("ADM", "Platform Admin", ParticipantType::Admin)
}

pub fn text(sender: &ParticipantProfile, to: &str, content: &str) -> NewMessage {
    NewMessage {
        sender: sender.clone(),
        receiver_id: to.to_string(),
        receiver_name: None,
        message_type: MessageType::Text,
        content: content.to_string(),
        attachments: vec![],
        sos_id: None,
    }
}

pub fn sos_text(sender: &ParticipantProfile, to: &str, content: &str, sos_id: &str) -> NewMessage {
    NewMessage {
        sos_id: Some(sos_id.to_string()),
        ..text(sender, to, content)
    }
}

pub fn token_for(state: &AppState, profile: &ParticipantProfile) -> String {
    state.jwt.issue(profile, 3600).expect("issue test token")
}
