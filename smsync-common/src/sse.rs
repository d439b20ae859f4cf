//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE plumbing for the progress stream endpoint.

use axum::response::sse::{Event, KeepAlive};
use std::time::Duration;

use crate::events::SyncEvent;

/// Standard keep-alive policy for smsync SSE streams
///
/// Heartbeat comments every 15 seconds keep intermediaries from closing the
/// connection between stats ticks.
pub fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("heartbeat")
}

/// Serialize a bus event into a named SSE event
///
/// Returns None when serialization fails; the caller logs and skips the
/// event (a malformed event must never terminate the stream).
pub fn event_to_sse(event: &SyncEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            tracing::warn!("SSE: failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_to_sse_produces_event() {
        let event = SyncEvent::JobCreated {
            job_id: 42,
            timestamp: Utc::now(),
        };
        assert!(event_to_sse(&event).is_some());
    }
}
