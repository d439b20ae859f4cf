//! Archive upload endpoint
//!
//! Accepts a multipart `file` field, streams it to disk, and starts the
//! import pipeline for zip archives. Failures answer 200 with an `error`
//! body: the dashboard's upload handler reads the body before the status,
//! and this keeps the shipped client working.

use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use smsync_common::events::SyncEvent;
use tokio::io::AsyncWriteExt;

use crate::db;
use crate::models::JobMeta;
use crate::services::archive::{storage, ImportOrchestrator};
use crate::AppState;

fn upload_error(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(json!({ "error": message.into() }))
}

/// POST /upload
pub async fn upload_backup(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    // Stream the `file` field to disk chunk by chunk; upload progress on
    // the client side is driven by request bytes, so nothing is buffered
    let mut stored: Option<(String, std::path::PathBuf, u64)> = None;
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return upload_error(format!("Malformed multipart request: {e}")),
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload.tmp").to_string();
        tracing::info!(
            "UPLOAD: {}, content_type={}",
            filename,
            field.content_type().unwrap_or("unknown")
        );

        let path = storage::temp_archive_path(&state.settings.upload_dir, &filename);
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("Failed to create upload file: {}", e);
                return upload_error(e.to_string());
            }
        };

        let mut size: u64 = 0;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    size += chunk.len() as u64;
                    if let Err(e) = file.write_all(&chunk).await {
                        tracing::error!("Failed to write upload: {}", e);
                        storage::remove_quietly(&path).await;
                        return upload_error(e.to_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Upload stream failed: {}", e);
                    storage::remove_quietly(&path).await;
                    return upload_error(e.to_string());
                }
            }
        }
        if let Err(e) = file.flush().await {
            storage::remove_quietly(&path).await;
            return upload_error(e.to_string());
        }
        stored = Some((filename, path, size));
        break;
    }

    let Some((filename, path, size)) = stored else {
        return upload_error("No file field in upload");
    };
    tracing::debug!("UPLOAD: stored {} ({} bytes)", path.display(), size);

    if !storage::is_zip(&path) {
        tracing::error!("Unsupported upload type: {}", filename);
        storage::remove_quietly(&path).await;
        return upload_error("Only zip archives of a Slack export can be uploaded");
    }

    // Register the job, then hand the archive to the background pipeline
    let meta = JobMeta {
        zip_path: Some(path.display().to_string()),
        ..Default::default()
    };
    let job_id = match db::jobs::create_job(&state.db, &meta).await {
        Ok(job_id) => job_id,
        Err(e) => {
            tracing::error!("Failed to create import job: {}", e);
            storage::remove_quietly(&path).await;
            return upload_error(e.to_string());
        }
    };
    state.event_bus.emit_lossy(SyncEvent::JobCreated {
        job_id,
        timestamp: Utc::now(),
    });

    let orchestrator =
        ImportOrchestrator::new(state.db.clone(), state.event_bus.clone(), state.settings.clone());
    tokio::spawn(async move {
        orchestrator.run(job_id, path).await;
    });

    Json(json!({
        "filename": filename,
        "size": size,
        "status": "processing",
        "job_id": job_id,
    }))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload_backup))
}
