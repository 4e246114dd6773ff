//! PostgreSQL ledger store against a live database.
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test postgres_store_test -- --ignored

use communication_service::{
    db,
    error::AppError,
    ledger::{compute_hash, LedgerStore, PostgresLedgerStore, StoreError, GENESIS_HASH},
    models::{
        conversation_id_for, Attachment, MessageType, NewMessage, ParticipantProfile,
        ParticipantType,
    },
    services::{ConversationView, LedgerService, RealtimeNotifier, RetryPolicy},
    websocket::ConnectionRegistry,
};
use deadpool_postgres::Pool;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn bootstrap_pool() -> Pool {
    let db_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL env var required for postgres store tests");
    let pool = db::init_pool(&db_url, 16)
        .await
        .expect("failed to connect to DATABASE_URL");
    db::run_migrations(&pool)
        .await
        .expect("failed to apply migrations");
    pool
}

/// One service instance over the shared database, as a replica would run it.
fn replica(pool: &Pool, max_attempts: u32) -> LedgerService {
    let store = Arc::new(PostgresLedgerStore::new(pool.clone()));
    LedgerService::new(
        store.clone(),
        store,
        RealtimeNotifier::new(ConnectionRegistry::new()),
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(5),
        },
    )
}

/// Fresh ids per test so runs never share a conversation.
fn party(prefix: &str, kind: ParticipantType) -> ParticipantProfile {
    let id = format!("{prefix}-{}", Uuid::new_v4().simple());
    ParticipantProfile::new(id.clone(), format!("{prefix} {id}"), kind)
}

fn text(sender: &ParticipantProfile, to: &ParticipantProfile, content: &str) -> NewMessage {
    NewMessage {
        sender: sender.clone(),
        receiver_id: to.id.clone(),
        receiver_name: Some(to.name.clone()),
        message_type: MessageType::Text,
        content: content.to_string(),
        attachments: vec![],
        sos_id: None,
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn stale_tail_is_refused_and_rolled_back() {
    let pool = bootstrap_pool().await;
    let store = PostgresLedgerStore::new(pool.clone());
    let ledger = replica(&pool, 2);
    let bank = party("BB", ParticipantType::Bloodbank);
    let hospital = party("H", ParticipantType::Hospital);

    let first = ledger.append(text(&bank, &hospital, "first")).await.unwrap();

    // A second genesis for the same conversation.
    let mut second_genesis = first.clone();
    second_genesis.id = Uuid::new_v4();
    second_genesis.content = "another genesis".into();
    second_genesis.current_hash = compute_hash(&second_genesis);
    assert!(matches!(
        store.append(&second_genesis).await,
        Err(StoreError::TailMoved { .. })
    ));

    // Right sequence, wrong predecessor.
    let mut forged = first.clone();
    forged.id = Uuid::new_v4();
    forged.sequence_number = 1;
    forged.previous_hash = GENESIS_HASH.to_string();
    forged.current_hash = compute_hash(&forged);
    assert!(matches!(
        store.append(&forged).await,
        Err(StoreError::TailMoved { .. })
    ));

    // Valid link, but the id collides: the tail swap must roll back with it.
    let mut duplicate_id = first.clone();
    duplicate_id.sequence_number = 1;
    duplicate_id.previous_hash = first.current_hash.clone();
    duplicate_id.current_hash = compute_hash(&duplicate_id);
    assert!(matches!(
        store.append(&duplicate_id).await,
        Err(StoreError::TailMoved { .. })
    ));

    let tail = store.tail(first.conversation_id).await.unwrap().unwrap();
    assert_eq!(tail.id, first.id);
    let next = ledger.append(text(&hospital, &bank, "second")).await.unwrap();
    assert_eq!(next.sequence_number, 1);
    assert_eq!(next.previous_hash, first.current_hash);
}

#[tokio::test]
#[ignore]
#[serial]
async fn replicas_appending_concurrently_build_one_chain() {
    let pool = bootstrap_pool().await;
    let replicas = [Arc::new(replica(&pool, 10)), Arc::new(replica(&pool, 10))];
    let bank = party("BB", ParticipantType::Bloodbank);
    let hospital = party("H", ParticipantType::Hospital);

    const N: usize = 24;
    let mut handles = Vec::with_capacity(N);
    for i in 0..N {
        let ledger = replicas[i % 2].clone();
        let msg = if i % 3 == 0 {
            text(&hospital, &bank, &format!("burst {i}"))
        } else {
            text(&bank, &hospital, &format!("burst {i}"))
        };
        handles.push(tokio::spawn(async move { ledger.append(msg).await }));
    }

    let mut seqs = Vec::with_capacity(N);
    for handle in handles {
        seqs.push(handle.await.unwrap().expect("append").sequence_number);
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (0..N as i64).collect::<Vec<_>>());

    let cid = conversation_id_for(&bank.id, &hospital.id);
    let report = replicas[0].verify(&bank, cid).await.unwrap();
    assert!(report.is_valid, "{report:?}");
    assert_eq!(report.message_count, N);
}

#[tokio::test]
#[ignore]
#[serial]
async fn reloaded_rows_hash_to_what_was_written() {
    let pool = bootstrap_pool().await;
    let ledger = replica(&pool, 2);
    let bank = party("BB", ParticipantType::Bloodbank);
    let hospital = party("H", ParticipantType::Hospital);

    let mut with_file = text(&bank, &hospital, "crossmatch attached");
    with_file.message_type = MessageType::BloodResponse;
    with_file.sos_id = Some(format!("SOS-{}", Uuid::new_v4().simple()));
    with_file.attachments = vec![Attachment {
        id: Uuid::new_v4(),
        file_name: "crossmatch.pdf".into(),
        file_type: "application/pdf".into(),
        file_size: 19,
        url: "/attachments/abc".into(),
        content_hash: "ab".repeat(32),
        ocr_text: Some("O NEG x4".into()),
    }];
    let written = ledger.append(with_file).await.unwrap();
    ledger
        .append(text(&hospital, &bank, "received"))
        .await
        .unwrap();

    // A fresh store instance only sees what the database returns.
    let reloaded = PostgresLedgerStore::new(pool.clone())
        .message(written.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.attachments, written.attachments);
    assert_eq!(reloaded.created_at, written.created_at);
    assert_eq!(reloaded.previous_hash.len(), 64);
    assert_eq!(reloaded.current_hash, written.current_hash);
    assert_eq!(compute_hash(&reloaded), written.current_hash);

    let report = replica(&pool, 2)
        .verify(&hospital, written.conversation_id)
        .await
        .unwrap();
    assert!(report.is_valid);
    assert_eq!(report.message_count, 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn summaries_agree_across_replicas() {
    let pool = bootstrap_pool().await;
    let writer = replica(&pool, 2);
    let reader = replica(&pool, 2);
    let bank = party("BB", ParticipantType::Bloodbank);
    let hospital = party("H", ParticipantType::Hospital);

    let first = writer.append(text(&bank, &hospital, "4 units O-")).await.unwrap();
    writer
        .append(text(&bank, &hospital, "dispatching"))
        .await
        .unwrap();

    assert_eq!(reader.unread_count(&hospital).await.unwrap(), 2);
    let summaries = reader.conversations(&hospital).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].partner_id, bank.id);
    assert_eq!(summaries[0].partner_name, bank.name);
    assert_eq!(summaries[0].partner_type, Some(ParticipantType::Bloodbank));
    assert_eq!(summaries[0].last_message, "dispatching");
    assert_eq!(summaries[0].last_sequence_number, 1);

    // Read through the reader, observed through the writer.
    assert!(reader.mark_read(first.id, &hospital).await.unwrap().changed);
    assert_eq!(writer.unread_count(&hospital).await.unwrap(), 1);

    let bank_view = writer.conversations(&bank).await.unwrap();
    assert_eq!(bank_view[0].partner_id, hospital.id);
    assert_eq!(bank_view[0].partner_type, None);
    assert_eq!(bank_view[0].unread_count, 0);

    let store = PostgresLedgerStore::new(pool.clone());
    assert_eq!(
        store.known_name(&bank.id).await.unwrap().as_deref(),
        Some(bank.name.as_str())
    );
    assert_eq!(store.known_name(&hospital.id).await.unwrap(), None);
}

#[tokio::test]
#[ignore]
#[serial]
async fn only_read_state_may_be_updated_in_place() {
    let pool = bootstrap_pool().await;
    let ledger = replica(&pool, 2);
    let bank = party("BB", ParticipantType::Bloodbank);
    let hospital = party("H", ParticipantType::Hospital);
    let message = ledger.append(text(&bank, &hospital, "units ready")).await.unwrap();

    let client = pool.get().await.unwrap();
    for column in ["sender_name", "receiver_id", "sos_id", "content"] {
        let sql = format!("UPDATE ledger_messages SET {column} = 'forged' WHERE id = $1");
        let err = client
            .execute(sql.as_str(), &[&message.id])
            .await
            .expect_err(column);
        let db_error = err.as_db_error().expect("trigger error");
        assert!(db_error.message().contains("append-only"), "{column}");
    }

    let updated = client
        .execute(
            "UPDATE ledger_messages SET is_read = TRUE, read_at = NOW() WHERE id = $1",
            &[&message.id],
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let report = ledger.verify(&hospital, message.conversation_id).await.unwrap();
    assert!(report.is_valid);
    assert!(matches!(
        ledger.mark_read(message.id, &bank).await,
        Err(AppError::Forbidden(_))
    ));
}
