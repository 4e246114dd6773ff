mod common;

use actix_web::{http::header, http::StatusCode, test, web, App};
use common::*;
use communication_service::{
    ledger::LedgerStore,
    models::{conversation_id_for, ConversationSummary, Message, VerificationReport},
    routes,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

const BOUNDARY: &str = "ledger-test-boundary";

struct FilePart<'a> {
    name: &'a str,
    content_type: &'a str,
    bytes: &'a [u8],
}

fn multipart_body(fields: &[(&str, &str)], files: &[FilePart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for file in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

fn send_request(token: &str, fields: &[(&str, &str)], files: &[FilePart<'_>]) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/communication/send")
        .insert_header(bearer(token))
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(fields, files))
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn requests_without_a_token_are_rejected() {
    let ctx = test_app();
    let app = init_app!(ctx.state);

    let req = test::TestRequest::get()
        .uri("/communication/conversations")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "TOKEN_MISSING");
    assert_eq!(body["error_type"], "authentication_error");

    let req = test::TestRequest::get()
        .uri("/communication/conversations")
        .insert_header(bearer("not-a-jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn sos_scenario_over_http() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let bank_token = token_for(&ctx.state, &blood_bank());
    let hospital_token = token_for(&ctx.state, &hospital());
    let admin_token = token_for(&ctx.state, &admin());

    let req = send_request(
        &bank_token,
        &[
            ("receiverId", "H1"),
            ("receiverName", "St. Mary Hospital"),
            ("messageType", "blood_response"),
            ("content", "Blood units available"),
            ("sosId", "SOS-42"),
        ],
        &[],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let first: Message = test::read_body_json(resp).await;
    assert_eq!(first.sequence_number, 0);
    assert_eq!(first.sender_name, "Central Blood Bank");

    let req = send_request(
        &hospital_token,
        &[
            ("receiverId", "BB1"),
            ("content", "Confirmed, dispatching now"),
            ("sosId", "SOS-42"),
        ],
        &[],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let second: Message = test::read_body_json(resp).await;
    assert_eq!(second.sequence_number, 1);
    assert_eq!(second.previous_hash, first.current_hash);
    assert_eq!(second.receiver_name, "Central Blood Bank");

    let req = test::TestRequest::get()
        .uri("/communication/conversation/BB1")
        .insert_header(bearer(&hospital_token))
        .to_request();
    let thread: Vec<Message> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, first.id);

    let cid = conversation_id_for("BB1", "H1");
    let req = test::TestRequest::get()
        .uri(&format!("/communication/conversation/{cid}/verify"))
        .insert_header(bearer(&bank_token))
        .to_request();
    let report: VerificationReport = test::call_and_read_body_json(&app, req).await;
    assert!(report.is_valid);
    assert_eq!(report.message_count, 2);

    let req = test::TestRequest::get()
        .uri("/communication/sos/SOS-42/audit")
        .insert_header(bearer(&admin_token))
        .to_request();
    let audit: Vec<Message> = test::call_and_read_body_json(&app, req).await;
    let seqs: Vec<i64> = audit.iter().map(|m| m.sequence_number).collect();
    assert_eq!(seqs, vec![0, 1]);

    let req = test::TestRequest::get()
        .uri("/communication/conversations")
        .insert_header(bearer(&bank_token))
        .to_request();
    let summaries: Vec<ConversationSummary> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].partner_id, "H1");
    assert_eq!(summaries[0].last_message, "Confirmed, dispatching now");
    assert_eq!(summaries[0].unread_count, 1);
    assert_eq!(summaries[0].sos_id.as_deref(), Some("SOS-42"));

    let req = test::TestRequest::get()
        .uri("/communication/unread-count")
        .insert_header(bearer(&bank_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["unreadCount"], 1);
}

#[actix_web::test]
async fn attachments_are_stored_by_content_hash() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let token = token_for(&ctx.state, &blood_bank());
    let pdf = b"%PDF-1.4 crossmatch report";

    let req = send_request(
        &token,
        &[("receiverId", "H1"), ("messageType", "document")],
        &[FilePart {
            name: "crossmatch.pdf",
            content_type: "application/pdf",
            bytes: pdf,
        }],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let message: Message = test::read_body_json(resp).await;

    let expected = hex::encode(Sha256::digest(pdf));
    assert_eq!(message.attachments.len(), 1);
    let attachment = &message.attachments[0];
    assert_eq!(attachment.file_name, "crossmatch.pdf");
    assert_eq!(attachment.file_size, pdf.len() as u64);
    assert_eq!(attachment.content_hash, expected);
    assert!(attachment.url.ends_with(&expected));
    assert_eq!(ctx.blobs.len(), 1);
}

#[actix_web::test]
async fn disallowed_attachment_types_are_rejected_before_append() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let token = token_for(&ctx.state, &blood_bank());

    let req = send_request(
        &token,
        &[("receiverId", "H1"), ("content", "see attached")],
        &[FilePart {
            name: "setup.exe",
            content_type: "application/x-msdownload",
            bytes: b"MZ",
        }],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "ATTACHMENT_REJECTED");

    assert!(ctx.blobs.is_empty());
    assert!(ctx.store.all_messages().await.unwrap().is_empty());
}

#[actix_web::test]
async fn invalid_messages_are_rejected() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let token = token_for(&ctx.state, &blood_bank());

    for fields in [
        vec![("content", "no receiver")],
        vec![("receiverId", "H1"), ("content", "   ")],
        vec![("receiverId", "BB1"), ("content", "to myself")],
        vec![("receiverId", "H1"), ("content", "x"), ("messageType", "gossip")],
    ] {
        let req = send_request(&token, &fields, &[]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{fields:?}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "MESSAGE_INVALID");
    }
}

#[actix_web::test]
async fn rejected_messages_leave_no_attachment_behind() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let token = token_for(&ctx.state, &blood_bank());
    let long_sos = "S".repeat(129);
    let long_content = "x".repeat(10_001);

    for fields in [
        vec![("receiverId", "BB1"), ("content", "to myself")],
        vec![("receiverId", "H1"), ("content", "tagged"), ("sosId", long_sos.as_str())],
        vec![("receiverId", "H1"), ("content", long_content.as_str())],
    ] {
        let req = send_request(
            &token,
            &fields,
            &[FilePart {
                name: "crossmatch.pdf",
                content_type: "application/pdf",
                bytes: b"%PDF-1.4 crossmatch",
            }],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", fields[0].1);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "MESSAGE_INVALID");
    }

    assert!(ctx.blobs.is_empty());
    assert!(ctx.store.all_messages().await.unwrap().is_empty());
}

#[actix_web::test]
async fn mark_read_is_receiver_only_and_idempotent() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let bank_token = token_for(&ctx.state, &blood_bank());
    let hospital_token = token_for(&ctx.state, &hospital());

    let message = ctx
        .state
        .ledger
        .append(text(&blood_bank(), "H1", "units ready"))
        .await
        .unwrap();
    let uri = format!("/communication/message/{}/read", message.id);

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(bearer(&bank_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "NOT_MESSAGE_RECEIVER");

    for expected_change in [true, false] {
        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(bearer(&hospital_token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["changed"], expected_change);
        assert_eq!(body["message"]["isRead"], true);
    }

    let req = test::TestRequest::get()
        .uri("/communication/unread-count")
        .insert_header(bearer(&hospital_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["unreadCount"], 0);

    let req = test::TestRequest::post()
        .uri(&format!("/communication/message/{}/read", uuid::Uuid::new_v4()))
        .insert_header(bearer(&hospital_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn verify_reports_tampering_with_200() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let admin_token = token_for(&ctx.state, &admin());

    let first = ctx
        .state
        .ledger
        .append(sos_text(&blood_bank(), "H1", "Blood units available", "SOS-42"))
        .await
        .unwrap();
    ctx.state
        .ledger
        .append(sos_text(&hospital(), "BB1", "Confirmed, dispatching now", "SOS-42"))
        .await
        .unwrap();
    ctx.store
        .overwrite_raw(first.id, |m| m.content = "No units".into())
        .await;

    let req = test::TestRequest::get()
        .uri(&format!(
            "/communication/conversation/{}/verify",
            first.conversation_id
        ))
        .insert_header(bearer(&admin_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["isValid"], false);
    assert_eq!(body["brokenAt"], 1);
    assert_eq!(body["messageCount"], 2);
}

#[actix_web::test]
async fn verify_checks_membership_and_existence() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let outsider_token = token_for(&ctx.state, &other_hospital());

    let message = ctx
        .state
        .ledger
        .append(text(&blood_bank(), "H1", "private"))
        .await
        .unwrap();

    let req = test::TestRequest::get()
        .uri(&format!(
            "/communication/conversation/{}/verify",
            message.conversation_id
        ))
        .insert_header(bearer(&outsider_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri(&format!(
            "/communication/conversation/{}/verify",
            uuid::Uuid::new_v4()
        ))
        .insert_header(bearer(&outsider_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "CONVERSATION_NOT_FOUND");
}

#[actix_web::test]
async fn appending_onto_a_tampered_tail_fails_with_integrity_error() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let token = token_for(&ctx.state, &blood_bank());

    let tail = ctx
        .state
        .ledger
        .append(text(&blood_bank(), "H1", "original"))
        .await
        .unwrap();
    ctx.store
        .overwrite_raw(tail.id, |m| m.content = "forged".into())
        .await;

    let req = send_request(&token, &[("receiverId", "H1"), ("content", "next")], &[]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "CHAIN_INTEGRITY_VIOLATION");
    assert_eq!(body["error_type"], "integrity_error");
    assert_eq!(ctx.store.all_messages().await.unwrap().len(), 1);
}

#[actix_web::test]
async fn health_and_metrics_are_public() {
    let ctx = test_app();
    let app = init_app!(ctx.state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    ctx.state
        .ledger
        .append(text(&blood_bank(), "H1", "count me"))
        .await
        .unwrap();
    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("ledger_appends_total"));
}
