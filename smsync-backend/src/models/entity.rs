//! Universal entity mapping model
//!
//! Every Slack object (user, channel, message, reaction, attachment, custom
//! emoji) lands in one `entities` table keyed by `(entity_type, slack_id)`,
//! tracking its Mattermost counterpart and export status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of migrated entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Channel,
    Message,
    Reaction,
    Attachment,
    CustomEmoji,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Channel => "channel",
            EntityType::Message => "message",
            EntityType::Reaction => "reaction",
            EntityType::Attachment => "attachment",
            EntityType::CustomEmoji => "custom_emoji",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(EntityType::User),
            "channel" => Some(EntityType::Channel),
            "message" => Some(EntityType::Message),
            "reaction" => Some(EntityType::Reaction),
            "attachment" => Some(EntityType::Attachment),
            "custom_emoji" => Some(EntityType::CustomEmoji),
            _ => None,
        }
    }

    /// Whether rows of this type are scoped to a single job.
    ///
    /// Users, channels and custom emojis are global (re-imports reuse them);
    /// messages, reactions and attachments belong to the job that created
    /// them.
    pub fn is_job_scoped(&self) -> bool {
        matches!(
            self,
            EntityType::Message | EntityType::Reaction | EntityType::Attachment
        )
    }
}

/// Export status of a mapping
///
/// - pending: awaiting export
/// - skipped: excluded from export
/// - failed: export attempted and failed
/// - success: exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    Pending,
    Skipped,
    Failed,
    Success,
}

impl MappingStatus {
    /// Fixed display order used by the stats matrix
    pub const ORDER: [MappingStatus; 4] = [
        MappingStatus::Pending,
        MappingStatus::Skipped,
        MappingStatus::Failed,
        MappingStatus::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Skipped => "skipped",
            MappingStatus::Failed => "failed",
            MappingStatus::Success => "success",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MappingStatus::Pending),
            "skipped" => Some(MappingStatus::Skipped),
            "failed" => Some(MappingStatus::Failed),
            "success" => Some(MappingStatus::Success),
            _ => None,
        }
    }
}

/// A row from the `entities` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub entity_type: EntityType,
    pub slack_id: String,
    pub mattermost_id: Option<String>,
    pub raw_data: serde_json::Value,
    pub status: MappingStatus,
    pub error_message: Option<String>,
    pub job_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Relation kinds between entities
pub mod relation {
    pub const POSTED_IN: &str = "posted_in";
    pub const POSTED_BY: &str = "posted_by";
    pub const THREAD_OF: &str = "thread_of";
    pub const REACTED_BY: &str = "reacted_by";
    pub const REACTED_TO: &str = "reacted_to";
    pub const ATTACHED_TO: &str = "attached_to";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_round_trips() {
        for t in [
            EntityType::User,
            EntityType::Channel,
            EntityType::Message,
            EntityType::Reaction,
            EntityType::Attachment,
            EntityType::CustomEmoji,
        ] {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_job_scoping() {
        assert!(EntityType::Message.is_job_scoped());
        assert!(EntityType::Reaction.is_job_scoped());
        assert!(EntityType::Attachment.is_job_scoped());
        assert!(!EntityType::User.is_job_scoped());
        assert!(!EntityType::Channel.is_job_scoped());
        assert!(!EntityType::CustomEmoji.is_job_scoped());
    }

    #[test]
    fn test_status_order_matches_display_contract() {
        let names: Vec<&str> = MappingStatus::ORDER.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, ["pending", "skipped", "failed", "success"]);
    }
}
