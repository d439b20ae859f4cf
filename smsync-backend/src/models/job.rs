//! Import job state machine
//!
//! A job is created when an upload is accepted and progresses through the
//! ordered pipeline stages:
//! extracting → users → channels → messages → emojis → reactions →
//! attachments → exporting → done

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }
}

/// Pipeline stage within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Extracting,
    Users,
    Channels,
    Messages,
    Emojis,
    Reactions,
    Attachments,
    Exporting,
    Done,
}

impl ImportStage {
    /// All stages in pipeline order
    pub const ORDER: [ImportStage; 9] = [
        ImportStage::Extracting,
        ImportStage::Users,
        ImportStage::Channels,
        ImportStage::Messages,
        ImportStage::Emojis,
        ImportStage::Reactions,
        ImportStage::Attachments,
        ImportStage::Exporting,
        ImportStage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStage::Extracting => "extracting",
            ImportStage::Users => "users",
            ImportStage::Channels => "channels",
            ImportStage::Messages => "messages",
            ImportStage::Emojis => "emojis",
            ImportStage::Reactions => "reactions",
            ImportStage::Attachments => "attachments",
            ImportStage::Exporting => "exporting",
            ImportStage::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ORDER.iter().copied().find(|stage| stage.as_str() == s)
    }

    /// Whether this stage is part of the archive-intake phase.
    ///
    /// Import stages weight progress by JSON file counts; exporting/done
    /// weight by the per-entity counters.
    pub fn is_import_stage(&self) -> bool {
        !matches!(self, ImportStage::Exporting | ImportStage::Done)
    }
}

/// Pre-counted entity totals for progress weighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTotals {
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub reactions: u64,
    #[serde(default)]
    pub attachments: u64,
    #[serde(default)]
    pub emojis: u64,
}

impl JobTotals {
    /// True when no meaningful totals are recorded yet.
    ///
    /// Emojis alone don't count: the message/reaction/attachment totals are
    /// the ones the registry derives from entity rows when missing.
    pub fn is_effectively_empty(&self) -> bool {
        self.messages == 0 && self.reactions == 0 && self.attachments == 0
    }
}

/// Job metadata blob, stored as JSON in the `meta` column
///
/// Counters are mutated concurrently by the pipeline's progress callbacks;
/// persistence happens through single-statement merges (see `db::jobs`), the
/// struct here is the deserialized read-side view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMeta {
    /// Uploaded archive path (kept for file-total backfill)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_path: Option<String>,

    /// Extraction directory; cleared when the job finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_dir: Option<String>,

    /// Total JSON files in the archive (manifests + daily message files)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_files_total: Option<u64>,

    #[serde(default)]
    pub json_files_processed: u64,

    /// Pre-counted entity totals; authoritative once present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<JobTotals>,

    #[serde(default)]
    pub messages_processed: u64,
    #[serde(default)]
    pub emojis_processed: u64,
    #[serde(default)]
    pub reactions_processed: u64,
    #[serde(default)]
    pub attachments_processed: u64,

    /// Ordered stage names, recorded for dashboard rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<String>>,
}

impl JobMeta {
    pub fn stage_names() -> Vec<String> {
        ImportStage::ORDER
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

/// A background import/export job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: i64,
    pub status: JobStatus,
    pub current_stage: Option<ImportStage>,
    pub meta: JobMeta,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
