//! HTTP integration tests driving the router with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use tabular_query_orchestrator::api::create_router;
use tabular_query_orchestrator::config::Settings;
use tabular_query_orchestrator::dataset::{fallback_frame, DatasetProvider};
use tabular_query_orchestrator::generation::ScriptedGenerator;
use tabular_query_orchestrator::memory::{FileSessionStore, SessionStore};
use tabular_query_orchestrator::Orchestrator;

// =============================================================================
// Helpers
// =============================================================================

fn generator() -> ScriptedGenerator {
    ScriptedGenerator::new()
        .on("Classify the user's query", |prompt| {
            let asked = prompt
                .lines()
                .find(|line| line.starts_with("User query:"))
                .unwrap_or_default()
                .to_lowercase();
            if asked.contains("salary") {
                "DATA_QUERY".to_string()
            } else {
                "GENERAL".to_string()
            }
        })
        .reply("Determine if this query requires", "BRIEF")
        .reply("map it to the EXACT field name", r#"{"salary": "Salary"}"#)
        .reply("Table Analysis Task", "df['Salary'].mean()")
        .reply("Data result:", "The average salary is 72,500.")
        .reply("Your response:", "Hello! How can I help?")
}

struct TestApp {
    _dir: TempDir,
    router: axum::Router,
    store: Arc<dyn SessionStore>,
}

fn make_app(development: bool) -> TestApp {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        storage_dir: dir.path().join("conversations"),
        backup_dir: Some(dir.path().join("backups")),
        development,
        ..Settings::default()
    };
    let store: Arc<dyn SessionStore> =
        Arc::new(FileSessionStore::open(&settings.storage_dir).unwrap());
    let dataset = Arc::new(DatasetProvider::from_frame(fallback_frame()));
    let orchestrator = Orchestrator::new(settings, Arc::clone(&store), dataset, Arc::new(generator()));

    TestApp {
        _dir: dir,
        router: create_router(Arc::new(orchestrator)),
        store,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec();
    (status, bytes)
}

async fn send_json(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

// =============================================================================
// Health & query
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = make_app(false);
    let (status, body) = send_json(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_data_query_round_trip() {
    let app = make_app(true);
    let (status, body) = send_json(
        &app,
        post_json("/query", json!({"query": "What's the average salary?", "session_id": "http-a"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["source"], "dataframe");
    assert_eq!(body["data"]["answer"], "The average salary is 72,500.");
    assert_eq!(body["data"]["debug"]["raw_result"], json!(72500.0));

    let session = app.store.get("http-a").unwrap().unwrap();
    assert_eq!(session.messages.len(), 2);
}

#[tokio::test]
async fn test_general_query_has_no_debug() {
    let app = make_app(false);
    let (_, body) = send_json(&app, post_json("/query", json!({"query": "Hi there"}))).await;
    assert_eq!(body["data"]["source"], "conversation");
    assert!(body["data"].get("debug").is_none());
    assert!(!body["data"]["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let app = make_app(false);
    let (status, body) = send_json(&app, post_json("/query", json!({"query": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_session_lifecycle() {
    let app = make_app(false);

    let (status, body) = send_json(&app, post_json("/sessions/init", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["sessionId"].as_str().unwrap().to_string();

    send_json(&app, post_json("/query", json!({"query": "Hello", "session_id": id}))).await;

    let (status, body) = send_json(&app, get(&format!("/sessions/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["title"], "Hello");

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/sessions/{}/metadata", id))
        .header("content-type", "application/json")
        .body(Body::from(json!({"tags": ["greeting"]}).to_string()))
        .unwrap();
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tags"], json!(["greeting"]));

    let (_, body) = send_json(&app, get("/sessions?tag=greeting")).await;
    assert_eq!(body["data"]["total"], 1);

    let (status, _) = send_json(&app, post_json(&format!("/sessions/{}/clear", id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.store.get(&id).unwrap().unwrap().messages.is_empty());

    let request = Request::delete(format!("/sessions/{}", id)).body(Body::empty()).unwrap();
    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, get(&format!("/sessions/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_history_listing() {
    let app = make_app(false);
    send_json(&app, post_json("/query", json!({"query": "Hello", "session_id": "hist-1"}))).await;

    let (status, body) = send_json(&app, get("/sessions/history")).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"]["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["sessionId"], "hist-1");
    assert_eq!(history[0]["messageCount"], 2);
}

#[tokio::test]
async fn test_export_formats() {
    let app = make_app(false);
    send_json(&app, post_json("/query", json!({"query": "Hello <b>", "session_id": "exp"}))).await;

    let response = app
        .router
        .clone()
        .oneshot(get("/sessions/exp/export?format=html"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=utf-8"
    );
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Hello &lt;b&gt;"));

    let (status, _) = send(&app, get("/sessions/exp/export?format=pdf")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/sessions/missing/export")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_import_and_backup() {
    let app = make_app(false);

    let record = json!({
        "messages": [
            {"text": "q", "sender": "user", "timestamp": "2024-01-01T09:00:00"},
            {"text": "a", "sender": "assistant", "timestamp": "2024-01-01T09:00:01"}
        ]
    });
    let (status, body) = send_json(&app, post_json("/sessions/import", record)).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["sessionId"].as_str().unwrap().to_string();
    assert!(id.starts_with("imported_"));

    let imported = app.store.get(&id).unwrap().unwrap();
    assert_eq!(imported.metadata.title, "Imported conversation");

    let (status, body) = send_json(&app, post_json("/sessions/backup", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["files_copied"], 1);
}

// =============================================================================
// Maintenance & debug
// =============================================================================

#[tokio::test]
async fn test_cleanup_endpoint() {
    let app = make_app(false);
    send_json(&app, post_json("/query", json!({"query": "Hello", "session_id": "old"}))).await;

    let (status, body) = send_json(&app, get("/cleanup")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 0);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let (status, body) = send_json(&app, post_json("/cleanup?max_age_days=0", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 1);

    let (status, _) = send_json(&app, get("/cleanup?max_age_days=-3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, get("/cleanup?max_age_days=9223372036854775807")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_debug_requires_development_mode() {
    let app = make_app(false);
    let (status, _) = send_json(&app, get("/debug")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let app = make_app(true);
    let (status, body) = send_json(&app, get("/debug")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["dataset"]["rows"], 10);
    assert_eq!(body["data"]["dataset"]["origin"], "memory");
}
