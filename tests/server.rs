//! HTTP surface tests: the router is served on an ephemeral port and driven
//! with a real client.

mod common;

use common::*;
use paperchat::config::Config;
use paperchat::error::NO_DOCUMENTS_MESSAGE;
use paperchat::models::{Element, ElementCategory};
use paperchat::pipeline::Pipeline;
use paperchat::server::router;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn serve(pipeline: Arc<Pipeline>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(pipeline)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn small_document() -> Vec<Element> {
    vec![
        Element::new(ElementCategory::Title, "Introduction", 1),
        Element::new(
            ElementCategory::Text,
            paragraph("retrieval augmented generation", 400),
            1,
        ),
    ]
}

#[tokio::test]
async fn test_query_before_upload_returns_advisory_with_ok_status() {
    let h = harness(FakeBackend::new(vec![], vec![]));
    let base = serve(h.pipeline.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({ "query": "What is this paper about?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"], NO_DOCUMENTS_MESSAGE);
}

#[tokio::test]
async fn test_failed_answer_is_reported_in_response_text() {
    let h = harness(FakeBackend::new(small_document(), vec![]));
    h.pipeline.upload(Path::new("paper.pdf")).await.unwrap();
    h.generator
        .fail_answer
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let base = serve(h.pipeline.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({ "query": "What is this paper about?", "session_id": "web" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let text = body["response"].as_str().unwrap();
    assert!(text.starts_with("Error generating answer"), "{}", text);
}

#[tokio::test]
async fn test_health_reports_corpus_counts() {
    let h = harness(FakeBackend::new(small_document(), vec![]));
    let base = serve(h.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["corpus_loaded"], false);
    assert!(body["corpus"].is_null());

    h.pipeline.upload(Path::new("paper.pdf")).await.unwrap();
    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["corpus_loaded"], true);
    assert_eq!(body["corpus"]["documents"], 1);
}

#[tokio::test]
async fn test_upload_rejects_non_pdf_body() {
    let h = harness(FakeBackend::new(vec![], vec![]));
    let base = serve(h.pipeline.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/upload", base))
        .body("plain text, not a document")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_deleting_unknown_session_is_not_found() {
    let h = harness(FakeBackend::new(vec![], vec![]));
    let base = serve(h.pipeline.clone()).await;

    let resp = reqwest::Client::new()
        .delete(format!("{}/sessions/nobody", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_ingests_and_removes_scratch_file() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.server.upload_dir = tmp.path().join("uploads");
    let h = harness_with_config(FakeBackend::new(small_document(), vec![]), config);
    let base = serve(h.pipeline.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/upload", base))
        .body("%PDF-1.4 body handled by the fake backend")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["documents"], 1);

    let leftovers = std::fs::read_dir(tmp.path().join("uploads")).unwrap().count();
    assert_eq!(leftovers, 0);
}
