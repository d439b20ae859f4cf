//! Event types for the smsync event system
//!
//! Provides the shared event definitions and EventBus used to broadcast
//! migration progress from the background pipelines to SSE subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Migration lifecycle events
///
/// Events are broadcast via [`EventBus`] and serialized for SSE transmission.
/// The import/export orchestrators are the producers; the `/progress/stream`
/// handler is the primary consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A new import job was created (upload accepted)
    JobCreated {
        job_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Job advanced to a new pipeline stage
    JobStageChanged {
        job_id: i64,
        /// Stage before the transition, if any
        old_stage: Option<String>,
        new_stage: String,
        timestamp: DateTime<Utc>,
    },

    /// Per-entity progress counters were updated
    ///
    /// Emitted in batches during the messages/emojis/reactions/attachments
    /// stages, not per row.
    JobProgress {
        job_id: i64,
        stage: String,
        /// Entity type the delta applies to (message, reaction, ...)
        entity_type: String,
        processed_delta: u64,
        timestamp: DateTime<Utc>,
    },

    /// Job finished successfully (stage reached `done`)
    JobCompleted {
        job_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Job failed; error_message persisted on the job row
    JobFailed {
        job_id: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A standalone export run was triggered via POST /export
    ExportStarted {
        timestamp: DateTime<Utc>,
    },

    /// Plugin remediation (`ensure`) finished
    PluginEnsured {
        plugin_id: String,
        installed: bool,
        enabled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// SSE event name for this event
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::JobCreated { .. } => "JobCreated",
            SyncEvent::JobStageChanged { .. } => "JobStageChanged",
            SyncEvent::JobProgress { .. } => "JobProgress",
            SyncEvent::JobCompleted { .. } => "JobCompleted",
            SyncEvent::JobFailed { .. } => "JobFailed",
            SyncEvent::ExportStarted { .. } => "ExportStarted",
            SyncEvent::PluginEnsured { .. } => "PluginEnsured",
        }
    }
}

/// Central event distribution bus
///
/// Wraps tokio::broadcast, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` when nobody is listening.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case
    ///
    /// Progress events are advisory: if no SSE client is connected there is
    /// nothing to do, so the send error is swallowed at debug level.
    pub fn emit_lossy(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("EventBus: no subscribers, event dropped");
        }
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
