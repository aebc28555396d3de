use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use dumpreplay::driver::JournalEntry;
use dumpreplay::server::{ServerState, build_router};
use dumpreplay::{
    ChainPayload, ChainScheduler, DatabaseDriver, MemoryDriver, MemorySegmentStore,
    RecordingDispatcher, RunnerOptions, SegmentStore, Sequence, TransactionRunner,
};
use serde_json::{Value, json};
use tower::ServiceExt;

struct Harness {
    app: axum::Router,
    driver: MemoryDriver,
    store: MemorySegmentStore,
    dispatcher: RecordingDispatcher,
}

async fn harness() -> Harness {
    let driver = MemoryDriver::new();
    driver.execute("CREATE TABLE t (id INT);", None).await.unwrap();
    let store = MemorySegmentStore::new();
    let dispatcher = RecordingDispatcher::new();
    let scheduler = ChainScheduler::new(
        Arc::new(store.clone()),
        TransactionRunner::new(Arc::new(driver.clone()), RunnerOptions::default()),
        Arc::new(dispatcher.clone()),
    );
    Harness {
        app: build_router(ServerState::new(scheduler)),
        driver,
        store,
        dispatcher,
    }
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    if body.is_empty() {
        return (status, Value::Null);
    }
    let json = serde_json::from_slice::<Value>(&body).expect("body should be valid JSON");
    (status, json)
}

async fn send_json(app: &axum::Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request should build");
    read(app.clone().oneshot(request).await.expect("response expected")).await
}

async fn send_empty(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    read(app.clone().oneshot(request).await.expect("response expected")).await
}

async fn wait_until_drained(store: &MemorySegmentStore, remaining: usize) {
    for _ in 0..200 {
        if store.len().await == remaining {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store still holds {} records", store.len().await);
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness().await;
    let (status, body) = send_empty(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "ok");
}

#[tokio::test]
async fn invoke_accepts_and_runs_the_step() {
    let h = harness().await;
    h.store
        .put(Sequence::new(1).unwrap(), b"INSERT INTO t VALUES (1);\n")
        .await
        .unwrap();
    h.store
        .put(Sequence::new(2).unwrap(), b"INSERT INTO t VALUES (2);\n")
        .await
        .unwrap();

    let (status, body) = send_json(&h.app, "/invoke", json!({ "transaction": 1, "total": 2 })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["transaction"], 1);

    wait_until_drained(&h.store, 1).await;
    for _ in 0..200 {
        if !h.dispatcher.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.driver.rows("t").await.unwrap(), vec!["1"]);
    assert_eq!(
        h.dispatcher.sent(),
        vec![ChainPayload {
            transaction: 2,
            total: 2
        }]
    );
}

#[tokio::test]
async fn invoke_defaults_transaction_to_one() {
    let h = harness().await;
    h.store
        .put(Sequence::new(1).unwrap(), b"INSERT INTO t VALUES (7);\n")
        .await
        .unwrap();

    let (status, _) = send_json(&h.app, "/invoke", json!({ "total": 1 })).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    wait_until_drained(&h.store, 0).await;
    assert_eq!(h.driver.rows("t").await.unwrap(), vec!["7"]);
    assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn invoke_rejects_invalid_cursor() {
    let h = harness().await;
    let (status, body) = send_json(&h.app, "/invoke", json!({ "transaction": 3, "total": 2 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_CURSOR");
}

#[tokio::test]
async fn failed_step_is_accepted_but_not_continued() {
    let h = harness().await;
    h.store
        .put(Sequence::new(1).unwrap(), b"INSERT INTO missing VALUES (1);\n")
        .await
        .unwrap();

    let (status, _) = send_json(&h.app, "/invoke", json!({ "transaction": 1, "total": 2 })).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    for _ in 0..200 {
        let journal = h.driver.journal().await;
        if journal.iter().any(|entry| matches!(entry, JournalEntry::Rollback(_))) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.dispatcher.sent().is_empty());
    let (_, body) = send_empty(&h.app, "/status").await;
    assert_eq!(body["data"]["remaining"], json!([1]));
}

#[tokio::test]
async fn kickoff_dispatches_first_invocation() {
    let h = harness().await;

    let (status, body) = send_json(&h.app, "/kickoff", json!({ "total": 3 })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["started"], true);
    assert_eq!(body["data"]["first"]["transaction"], 1);

    let (status, body) = send_json(&h.app, "/kickoff", json!({ "total": 0 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["started"], false);

    assert_eq!(
        h.dispatcher.sent(),
        vec![ChainPayload {
            transaction: 1,
            total: 3
        }]
    );
}

#[tokio::test]
async fn status_lists_remaining_records() {
    let h = harness().await;
    h.store.put(Sequence::new(4).unwrap(), b"x").await.unwrap();
    h.store.put(Sequence::new(5).unwrap(), b"y").await.unwrap();

    let (status, body) = send_empty(&h.app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["remaining"], json!([4, 5]));
    assert_eq!(body["data"]["resume_from"], 4);
}
