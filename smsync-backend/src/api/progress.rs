//! Progress stream (SSE)
//!
//! Long-held stream pushing `stats` events: the full mapping statistics
//! snapshot plus the latest job, recomputed per tick. Job lifecycle events
//! from the bus are forwarded between ticks so stage changes appear without
//! waiting for the next tick. Compute failures emit an `error` event and
//! the stream stays up.

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use smsync_common::sse::{event_to_sse, keep_alive};
use std::convert::Infallible;
use std::time::Duration;

use crate::services::registry;
use crate::services::stats::mapping_stats;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Tick interval in seconds; floored at 0.25
    #[serde(default = "default_interval")]
    pub interval: f64,
}

fn default_interval() -> f64 {
    2.0
}

async fn stats_event(state: &AppState) -> Event {
    match snapshot(state).await {
        Ok(payload) => Event::default().event("stats").data(payload),
        Err(e) => {
            tracing::debug!("Progress stream snapshot failed: {}", e);
            Event::default()
                .event("error")
                .data(json!({ "error": e.to_string() }).to_string())
        }
    }
}

async fn snapshot(state: &AppState) -> smsync_common::Result<String> {
    let stats = mapping_stats(&state.db).await?;
    let job = match crate::db::jobs::latest_job(&state.db).await? {
        Some(job) => Some(registry::decorate_job(&state.db, job).await),
        None => None,
    };
    let mut payload = serde_json::to_value(&stats)?;
    payload["job"] = serde_json::to_value(&job)?;
    Ok(payload.to_string())
}

/// GET /progress/stream
pub async fn progress_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("New SSE client connected to progress stream");
    let interval = Duration::from_secs_f64(query.interval.max(0.25));
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        // Help proxies start streaming immediately, then hint the client's
        // reconnect delay
        yield Ok(Event::default().comment("init"));
        yield Ok(Event::default().retry(Duration::from_millis(2000)));

        loop {
            yield Ok(stats_event(&state).await);

            // Forward bus events until the next tick
            let tick = tokio::time::sleep(interval);
            tokio::pin!(tick);
            loop {
                tokio::select! {
                    _ = &mut tick => break,
                    received = rx.recv() => {
                        match received {
                            Ok(event) => {
                                if let Some(sse_event) = event_to_sse(&event) {
                                    yield Ok(sse_event);
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::debug!("SSE subscriber lagged, {} events skipped", skipped);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                // Bus gone; ticks alone keep the stream alive
                                tokio::time::sleep(interval).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}

/// Build progress stream routes
pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/progress/stream", get(progress_stream))
}
