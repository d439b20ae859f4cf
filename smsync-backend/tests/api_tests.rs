//! Integration tests for the backend API endpoints
//!
//! Tests cover:
//! - Health check (bare and /api-prefixed)
//! - Upload validation and the full import pipeline on a fixture archive
//! - Job registry shape, ordering and progress fields
//! - Mapping statistics matrix (zero-filled cells, fixed status order)
//! - Export trigger acknowledgement
//! - Plugin status/deploy error paths without Mattermost credentials
//! - Progress stream headers

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`
use zip::write::FileOptions;

use smsync_backend::config::Settings;
use smsync_backend::db;
use smsync_backend::models::{EntityType, JobMeta, MappingStatus};
use smsync_backend::{build_router, AppState};
use smsync_common::config::ConfigFile;
use smsync_common::events::EventBus;

/// Test helper: state with an in-memory database and no Mattermost
async fn test_state(dir: &std::path::Path) -> AppState {
    let pool = db::init_memory_pool().await.unwrap();

    let mut settings = Settings::load(&ConfigFile::empty());
    settings.upload_dir = dir.to_path_buf();
    settings.plugin_root = dir.join("plugin");
    settings.mm_url = None;
    settings.mm_token = None;
    settings.slack_bot_token = None;

    AppState::new(pool, EventBus::new(64), Arc::new(settings))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Multipart upload request with a single `file` field
fn multipart_upload(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "test-boundary-7f3a";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/zip\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn fixture_zip() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = FileOptions::default();

        writer.start_file("users.json", options).unwrap();
        writer
            .write_all(json!([{"id": "U1", "name": "alice"}]).to_string().as_bytes())
            .unwrap();

        writer.start_file("channels.json", options).unwrap();
        writer
            .write_all(json!([{"id": "C1", "name": "general"}]).to_string().as_bytes())
            .unwrap();

        writer.start_file("general/2024-01-01.json", options).unwrap();
        writer
            .write_all(
                json!([
                    {"ts": "1.0", "user": "U1", "text": "hello"},
                    {"ts": "2.0", "user": "U1", "text": "world",
                     "reactions": [{"name": "tada", "users": ["U1"]}]}
                ])
                .to_string()
                .as_bytes(),
            )
            .unwrap();

        writer.finish().unwrap();
    }
    cursor.into_inner()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn healthcheck_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(get("/healthcheck")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "smsync-backend");
}

#[tokio::test]
async fn healthcheck_api_prefix_alias() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(get("/api/healthcheck")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn upload_rejects_non_zip_with_error_body() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app
        .oneshot(multipart_upload("/upload", "notes.txt", b"plain text"))
        .await
        .unwrap();

    // Error travels in the body, status stays 200 for the dashboard
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("zip"));
    assert!(body.get("filename").is_none());
}

#[tokio::test]
async fn upload_without_file_field_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let boundary = "empty-boundary";
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(format!("--{boundary}--\r\n")))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn upload_zip_runs_import_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(multipart_upload("/upload", "export.zip", &fixture_zip()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response.into_body()).await;
    assert_eq!(body["filename"], "export.zip");
    assert_eq!(body["status"], "processing");
    assert!(body["size"].as_u64().unwrap() > 0);
    let job_id = body["job_id"].as_i64().unwrap();

    // The background pipeline has no Mattermost to talk to and finishes
    // quickly; poll the registry until it lands
    let mut done = false;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let response = app.clone().oneshot(get("/jobs")).await.unwrap();
        let body = body_json(response.into_body()).await;
        let job = body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .find(|j| j["id"].as_i64() == Some(job_id))
            .cloned();
        if let Some(job) = job {
            if job["current_stage"] == "done" {
                assert_eq!(job["status"], "success");
                assert_eq!(job["percent"], 100);
                assert_eq!(job["meta"]["totals"]["messages"], 2);
                assert_eq!(job["meta"]["totals"]["reactions"], 1);
                done = true;
                break;
            }
        }
    }
    assert!(done, "import job did not complete");

    // Entities are visible through the stats endpoint afterwards
    let response = app.oneshot(get("/stats/mappings")).await.unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["by_type"]["message"], 2);
    assert_eq!(body["by_type"]["user"], 1);
}

// =============================================================================
// Jobs
// =============================================================================

#[tokio::test]
async fn jobs_listing_is_most_recent_first_with_percent() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;

    let first = db::jobs::create_job(&state.db, &JobMeta::default()).await.unwrap();
    let second = db::jobs::create_job(&state.db, &JobMeta::default()).await.unwrap();

    let app = build_router(state);
    let response = app.oneshot(get("/jobs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response.into_body()).await;
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["id"].as_i64(), Some(second));
    assert_eq!(jobs[1]["id"].as_i64(), Some(first));

    for job in jobs {
        let percent = job["percent"].as_u64().unwrap();
        assert!((1..=100).contains(&percent));
        assert_eq!(job["status"], "running");
        assert_eq!(job["current_stage"], "extracting");
    }
}

#[tokio::test]
async fn jobs_listing_respects_limit() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    for _ in 0..5 {
        db::jobs::create_job(&state.db, &JobMeta::default()).await.unwrap();
    }

    let app = build_router(state);
    let response = app.oneshot(get("/jobs?limit=2")).await.unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 2);
}

// =============================================================================
// Stats
// =============================================================================

#[tokio::test]
async fn stats_matrix_zero_fills_and_orders_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;

    // Parent job for the job-scoped message entities (FK on entities.job_id)
    db::jobs::create_job(&state.db, &JobMeta::default()).await.unwrap();

    for i in 0..5 {
        let id = db::entities::insert_or_get(
            &state.db,
            EntityType::Message,
            &format!("{i}.0"),
            &json!({}),
            MappingStatus::Pending,
            Some(1),
        )
        .await
        .unwrap();
        db::entities::update_export_result(&state.db, id, MappingStatus::Success, None, None)
            .await
            .unwrap();
    }

    let app = build_router(state);
    let response = app.oneshot(get("/stats/mappings")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response.into_body()).await;
    assert_eq!(body["types"], json!(["message"]));
    assert_eq!(
        body["statuses"],
        json!(["pending", "skipped", "failed", "success"])
    );
    // The absent cell renders as 0, the populated one as 5
    assert_eq!(body["matrix"]["message"]["pending"], 0);
    assert_eq!(body["matrix"]["message"]["success"], 5);
    assert_eq!(body["totals_row"]["success"], 5);
    assert_eq!(body["total"], 5);
}

// =============================================================================
// Export
// =============================================================================

#[tokio::test]
async fn export_trigger_acknowledges_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(post("/export")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], "export_started");
    assert!(body["message"].as_str().is_some());
    assert!(body.get("error").is_none());
}

// =============================================================================
// Plugin
// =============================================================================

#[tokio::test]
async fn plugin_status_without_credentials_reports_error_field() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(get("/plugin/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response.into_body()).await;
    assert_eq!(body["installed"], false);
    assert_eq!(body["enabled"], false);
    assert!(body["error"].as_str().unwrap().contains("MM_URL"));
}

#[tokio::test]
async fn plugin_deploy_without_credentials_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(post("/plugin/deploy")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("MM_URL"));
}

#[tokio::test]
async fn plugin_ensure_without_credentials_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(post("/plugin/ensure")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Progress stream
// =============================================================================

#[tokio::test]
async fn progress_stream_is_event_stream() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app.oneshot(get("/progress/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}
