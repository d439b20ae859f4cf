//! Mattermost export pipeline
//!
//! Pushes pending mappings into Mattermost in dependency order (users,
//! custom emojis, channels, attachments, messages, reactions) so that by
//! the time a message is posted its author, channel and files already have
//! Mattermost ids. Each type drains through a bounded worker pool; one
//! entity failing marks only that entity failed.

pub mod attachment;
pub mod channel;
pub mod emoji;
pub mod message;
pub mod mm;
pub mod reaction;
pub mod text;
pub mod user;

use chrono::Utc;
use futures::StreamExt;
use smsync_common::events::{EventBus, SyncEvent};
use smsync_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Settings;
use crate::db;
use crate::models::{Entity, EntityType, MappingStatus};
use crate::services::plugin::plugin_id_from_manifest;
use crate::services::slack::SlackClient;

use mm::MmClient;

/// Export order: dependencies before dependents
pub const EXPORT_ORDER: [EntityType; 6] = [
    EntityType::User,
    EntityType::CustomEmoji,
    EntityType::Channel,
    EntityType::Attachment,
    EntityType::Message,
    EntityType::Reaction,
];

/// Shared dependencies for the per-entity exporters
pub struct ExportContext {
    pub pool: SqlitePool,
    pub mm: MmClient,
    pub slack: SlackClient,
    /// Token owner's Mattermost user id (emoji creator, author fallback)
    pub mm_user_id: String,
    pub job_id: Option<i64>,
}

/// Run the export pipeline.
///
/// Missing Mattermost credentials or an unreachable instance abort the
/// export with an error log but do not fail the caller: mappings stay
/// pending and a later run picks them up.
pub async fn run_export(
    pool: SqlitePool,
    settings: Arc<Settings>,
    event_bus: EventBus,
    job_id: Option<i64>,
) -> Result<()> {
    let plugin_id = plugin_id_from_manifest(&settings);
    let Some(mm) = MmClient::from_settings(&settings, plugin_id) else {
        tracing::error!("MM_URL or MM_TOKEN not set, skipping export");
        return Ok(());
    };
    let Some(mm_user_id) = mm.me().await else {
        tracing::error!("Could not resolve Mattermost token owner, aborting export");
        return Ok(());
    };

    event_bus.emit_lossy(SyncEvent::ExportStarted { timestamp: Utc::now() });

    let ctx = Arc::new(ExportContext {
        pool: pool.clone(),
        mm,
        slack: SlackClient::new(settings.slack_bot_token.clone()),
        mm_user_id,
        job_id,
    });

    let workers = settings.export_workers;
    for entity_type in EXPORT_ORDER {
        let entities = db::entities::exportable_entities(&pool, entity_type, job_id).await?;
        tracing::info!(
            "Exporting {} entities of type {}",
            entities.len(),
            entity_type.as_str()
        );

        futures::stream::iter(entities)
            .for_each_concurrent(workers, |entity| {
                let ctx = ctx.clone();
                async move {
                    export_one(&ctx, entity).await;
                }
            })
            .await;

        tracing::info!("Export of {} finished", entity_type.as_str());
    }

    Ok(())
}

async fn export_one(ctx: &ExportContext, entity: Entity) {
    tracing::debug!(
        "[EXPORT] {} {}",
        entity.entity_type.as_str(),
        entity.slack_id
    );
    match entity.entity_type {
        EntityType::User => user::export(ctx, &entity).await,
        EntityType::CustomEmoji => emoji::export(ctx, &entity).await,
        EntityType::Channel => channel::export(ctx, &entity).await,
        EntityType::Attachment => attachment::export(ctx, &entity).await,
        EntityType::Message => message::export(ctx, &entity).await,
        EntityType::Reaction => reaction::export(ctx, &entity).await,
    }
}

/// Record an export outcome, logging rather than propagating store errors
/// so one bad row cannot wedge a worker.
pub(crate) async fn set_status(
    ctx: &ExportContext,
    entity: &Entity,
    status: MappingStatus,
    mattermost_id: Option<&str>,
    error: Option<&str>,
) {
    if let Err(e) =
        db::entities::update_export_result(&ctx.pool, entity.id, status, mattermost_id, error).await
    {
        tracing::error!(
            "Failed to update status for {} {}: {}",
            entity.entity_type.as_str(),
            entity.slack_id,
            e
        );
    } else {
        tracing::debug!(
            "Set status {} for {} {}",
            status.as_str(),
            entity.entity_type.as_str(),
            entity.slack_id
        );
    }
}

/// Resolve Mattermost user ids for a list of Slack user ids, dropping
/// anything unmapped (members that never made it into Mattermost).
pub(crate) async fn resolve_mm_user_ids(ctx: &ExportContext, slack_ids: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for slack_id in slack_ids {
        match db::entities::find_by_slack_id(&ctx.pool, EntityType::User, slack_id).await {
            Ok(Some(entity)) => {
                if let Some(mm_id) = entity.mattermost_id.filter(|id| !id.is_empty()) {
                    out.push(mm_id);
                }
            }
            Ok(None) => tracing::warn!("MM user id not found for Slack user {}", slack_id),
            Err(e) => tracing::error!("User lookup failed for {}: {}", slack_id, e),
        }
    }
    out
}
