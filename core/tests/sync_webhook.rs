//! Webhook sync integration tests against a mock HTTP endpoint.

#![allow(clippy::expect_used)]

use std::time::Duration;

use dispatchlog_core::DispatchController;
use dispatchlog_core::DispatchError;
use dispatchlog_core::DispatchStore;
use dispatchlog_core::NewDispatch;
use dispatchlog_core::ScanInput;
use dispatchlog_core::ScanProvenance;
use dispatchlog_core::SyncClient;
use dispatchlog_core::SyncOutcome;
use dispatchlog_core::sync_dispatch;
use serde_json::Value;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

/// Controller with one finalized dispatch: 2 boxes of P100 (qty 10
/// each) and 1 box of P200 (qty 5).
fn controller_with_completed() -> (DispatchController, String) {
    let store = DispatchStore::open_in_memory().expect("open store");
    let mut ctl = DispatchController::new(store);

    let draft = ctl
        .create_draft(NewDispatch {
            customer_name: "ACME".to_string(),
            operator_id: "OP1".to_string(),
            driver_name: "R. Kumar".to_string(),
            driver_mobile: "9000000000".to_string(),
            vehicle_no: "MH14AB1234".to_string(),
            lr_no: "LR-77".to_string(),
        })
        .expect("create draft");
    let id = draft.dispatch_id.clone();

    for _ in 0..2 {
        ctl.add_scan(
            &id,
            ScanInput {
                part_no: "P100".to_string(),
                part_name: "P100 NAME".to_string(),
                qty_nos: 10,
                provenance: ScanProvenance::Ocr {
                    raw_text: "PART NO: P100\nQTY: 10 NOS".to_string(),
                    confidence: 0.95,
                },
            },
        )
        .expect("add scan");
    }
    ctl.add_manual_entries(&id, "P200", "", 1, 5).expect("manual");
    ctl.finalize(&id).expect("finalize");

    (ctl, id)
}

fn client_for(server: &MockServer) -> SyncClient {
    SyncClient::new(server.uri(), Duration::from_secs(5))
}

#[tokio::test]
async fn test_upload_marks_synced_and_sends_summary_rows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "dispatch_no": 42,
            "dispatch_id": "DSP-240109-07",
            "rows": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let outcome = sync_dispatch(&mut ctl, &client_for(&server), &id)
        .await
        .expect("sync");
    assert!(matches!(outcome, SyncOutcome::Uploaded { .. }));

    // Local dispatch keeps its own identity but is now marked synced
    let dispatch = ctl.dispatch(&id).expect("get");
    assert!(dispatch.sheets_synced);
    assert!(dispatch.sheets_synced_at.is_some());

    // The request carried one summary row per distinct part
    let requests = server.received_requests().await.expect("requests");
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(body["dispatch_id"], id.as_str());
    assert_eq!(body["dispatch_executive"], "OP1");
    let summary = body["summary"].as_array().expect("summary array");
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0]["part_no"], "P100");
    assert_eq!(summary[0]["boxes"], 2);
    assert_eq!(summary[0]["total_qty"], 20);
    assert_eq!(summary[1]["part_no"], "P200");
}

#[tokio::test]
async fn test_second_sync_is_duplicate_without_second_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let client = client_for(&server);

    let first = sync_dispatch(&mut ctl, &client, &id).await.expect("sync");
    assert!(matches!(first, SyncOutcome::Uploaded { .. }));

    // Second attempt is suppressed by the local key check; the mock's
    // expect(1) verifies no second POST went out.
    let second = sync_dispatch(&mut ctl, &client, &id).await.expect("sync");
    assert_eq!(second, SyncOutcome::Duplicate);
}

#[tokio::test]
async fn test_remote_duplicate_verdict_marks_synced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "duplicate": true,
            "message": "Duplicate dispatch skipped"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let outcome = sync_dispatch(&mut ctl, &client_for(&server), &id)
        .await
        .expect("sync");
    assert_eq!(outcome, SyncOutcome::Duplicate);
    assert!(ctl.dispatch(&id).expect("get").sheets_synced);
}

#[tokio::test]
async fn test_server_error_leaves_flags_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let err = sync_dispatch(&mut ctl, &client_for(&server), &id)
        .await
        .expect_err("server error");
    assert!(matches!(err, DispatchError::SyncFailure { .. }));

    let dispatch = ctl.dispatch(&id).expect("get");
    assert!(!dispatch.sheets_synced);
    assert!(dispatch.sheets_synced_at.is_none());
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "ok": true }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let client = SyncClient::new(server.uri(), Duration::from_millis(50));
    let err = sync_dispatch(&mut ctl, &client, &id)
        .await
        .expect_err("timeout");
    assert!(matches!(err, DispatchError::SyncTimeout(_)));
    assert!(!ctl.dispatch(&id).expect("get").sheets_synced);
}

#[tokio::test]
async fn test_unreadable_body_still_counts_as_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>redirect</html>"))
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let outcome = sync_dispatch(&mut ctl, &client_for(&server), &id)
        .await
        .expect("sync");
    assert_eq!(outcome, SyncOutcome::Uploaded { assigned: None });
    assert!(ctl.dispatch(&id).expect("get").sheets_synced);
}

#[tokio::test]
async fn test_foreign_json_body_without_ok_counts_as_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rows": 2 })))
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let outcome = sync_dispatch(&mut ctl, &client_for(&server), &id)
        .await
        .expect("sync");
    assert_eq!(outcome, SyncOutcome::Uploaded { assigned: None });
    assert!(ctl.dispatch(&id).expect("get").sheets_synced);
}

#[tokio::test]
async fn test_explicit_failure_report_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "error": "sheet tab missing"
        })))
        .mount(&server)
        .await;

    let (mut ctl, id) = controller_with_completed();
    let err = sync_dispatch(&mut ctl, &client_for(&server), &id)
        .await
        .expect_err("reported failure");
    assert!(matches!(err, DispatchError::SyncFailure { .. }));
    assert!(!ctl.dispatch(&id).expect("get").sheets_synced);
}

#[tokio::test]
async fn test_draft_identity_adopted_from_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "dispatch_no": 99,
            "dispatch_id": "DSP-240109-04"
        })))
        .mount(&server)
        .await;

    // An offline-created dispatch carries placeholder ids until the
    // webhook assigns its final identity.
    let store = DispatchStore::open_in_memory().expect("open store");
    let mut ctl = DispatchController::new(store);
    let offline = ctl
        .create_offline_draft(NewDispatch {
            customer_name: "ACME".to_string(),
            operator_id: "OP1".to_string(),
            driver_name: "R. Kumar".to_string(),
            driver_mobile: "9000000000".to_string(),
            vehicle_no: "MH14AB1234".to_string(),
            lr_no: "LR-77".to_string(),
        })
        .expect("offline draft");
    let old_id = offline.dispatch_id.clone();
    ctl.add_manual_entries(&old_id, "P100", "P100 NAME", 1, 10)
        .expect("manual");
    ctl.finalize(&old_id).expect("finalize");

    let outcome = sync_dispatch(&mut ctl, &client_for(&server), &old_id)
        .await
        .expect("sync");
    assert!(matches!(outcome, SyncOutcome::Uploaded { assigned: Some(_) }));

    // The assigned business key replaced the placeholder everywhere
    let renamed = ctl.dispatch("DSP-240109-04").expect("renamed");
    assert_eq!(renamed.dispatch_no, 99);
    assert!(renamed.sheets_synced);
    assert_eq!(ctl.scans("DSP-240109-04").expect("scans").len(), 1);
    assert!(matches!(
        ctl.dispatch(&old_id).expect_err("gone"),
        DispatchError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_draft_status_dispatch_refused() {
    let server = MockServer::start().await;
    let store = DispatchStore::open_in_memory().expect("open store");
    let mut ctl = DispatchController::new(store);
    let draft = ctl
        .create_draft(NewDispatch {
            customer_name: "ACME".to_string(),
            operator_id: "OP1".to_string(),
            driver_name: String::new(),
            driver_mobile: String::new(),
            vehicle_no: String::new(),
            lr_no: String::new(),
        })
        .expect("create draft");

    let err = sync_dispatch(&mut ctl, &client_for(&server), &draft.dispatch_id)
        .await
        .expect_err("draft refused");
    assert!(matches!(err, DispatchError::InvalidTransition(_)));
}
