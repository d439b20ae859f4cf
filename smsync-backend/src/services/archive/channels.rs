//! Channel and chat parsing
//!
//! Public channels, private groups, DMs and group DMs all become `channel`
//! entities; the export layer later decides which plugin route creates them.

use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::models::{EntityType, MappingStatus};

/// Channel manifest files, in parse order
pub const CHANNEL_MANIFESTS: [&str; 4] = ["channels.json", "dms.json", "mpims.json", "groups.json"];

/// Parse every channel manifest into `channel` entities
pub async fn parse_channels_and_chats(pool: &SqlitePool, extract_dir: &Path) -> Result<u64> {
    let mut saved = 0u64;

    for manifest in CHANNEL_MANIFESTS {
        let path = extract_dir.join(manifest);
        if !path.exists() {
            tracing::info!("{} not found in {}", manifest, extract_dir.display());
            continue;
        }
        let channels = super::read_json_array(&path)?;
        tracing::info!("Found {} objects in {}", channels.len(), manifest);

        for channel in &channels {
            let Some(slack_id) = channel.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            db::entities::insert_or_get(
                pool,
                EntityType::Channel,
                slack_id,
                channel,
                MappingStatus::Pending,
                None,
            )
            .await?;
            saved += 1;
        }
    }

    tracing::info!("Channel import finished, {} processed", saved);
    Ok(saved)
}

/// Map export folders to their channel objects.
///
/// Slack names message folders after the channel name for public/private
/// channels and after the channel id for DMs; match by id first, then name.
/// Folders with no matching channel are dropped (and logged).
pub fn folder_channel_map(extract_dir: &Path) -> Result<HashMap<String, serde_json::Value>> {
    let mut all_channels = Vec::new();
    for manifest in ["channels.json", "groups.json", "dms.json", "mpims.json"] {
        let path = extract_dir.join(manifest);
        if path.exists() {
            match super::read_json_array(&path) {
                Ok(mut channels) => all_channels.append(&mut channels),
                Err(e) => tracing::error!("Error reading {}: {}", manifest, e),
            }
        }
    }

    let mut by_id = HashMap::new();
    let mut by_name = HashMap::new();
    for channel in &all_channels {
        if let Some(id) = channel.get("id").and_then(|v| v.as_str()) {
            by_id.insert(id.to_string(), channel.clone());
        }
        if let Some(name) = channel.get("name").and_then(|v| v.as_str()) {
            by_name.insert(name.to_string(), channel.clone());
        }
    }

    let mut map = HashMap::new();
    for entry in std::fs::read_dir(extract_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(folder) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        match by_id.get(&folder).or_else(|| by_name.get(&folder)) {
            Some(channel) => {
                map.insert(folder, channel.clone());
            }
            None => {
                tracing::debug!("No channel matches folder {}", folder);
            }
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(dir: &Path) {
        std::fs::write(
            dir.join("channels.json"),
            r#"[{"id": "C1", "name": "general"}, {"id": "C2", "name": "random"}]"#,
        )
        .unwrap();
        std::fs::write(dir.join("dms.json"), r#"[{"id": "D1", "members": ["U1", "U2"]}]"#).unwrap();
        std::fs::create_dir(dir.join("general")).unwrap();
        std::fs::create_dir(dir.join("D1")).unwrap();
        std::fs::create_dir(dir.join("orphan")).unwrap();
    }

    #[tokio::test]
    async fn test_parse_all_manifests() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let saved = parse_channels_and_chats(&pool, dir.path()).await.unwrap();
        assert_eq!(saved, 3);
        assert!(db::entities::find_by_slack_id(&pool, EntityType::Channel, "D1")
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_folder_map_by_name_and_id() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let map = folder_channel_map(dir.path()).unwrap();
        assert_eq!(map["general"]["id"], "C1");
        assert_eq!(map["D1"]["id"], "D1");
        assert!(!map.contains_key("orphan"));
    }
}
