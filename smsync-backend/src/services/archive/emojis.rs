//! Custom emoji discovery
//!
//! Slack exports carry no emoji manifest; custom emojis are discovered by
//! scanning message text, rich-text blocks and classic attachments for
//! `:shortcode:` usages, then matched against the workspace emoji list from
//! the Slack API. Only names that resolve to a real image URL (following
//! `alias:` chains) become entities.

use regex::Regex;
use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use crate::db;
use crate::models::{EntityType, ImportStage, MappingStatus};

use super::ProgressReporter;

fn emoji_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r":([a-z0-9_+\-]+):").unwrap())
}

/// Shortcodes in a plain text fragment
pub fn shortcodes_in_text(text: &str) -> HashSet<String> {
    emoji_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Shortcodes in a message's block kit payload
pub fn shortcodes_in_blocks(blocks: &[serde_json::Value]) -> HashSet<String> {
    let mut names = HashSet::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("rich_text") => {
                for element in block.get("elements").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                    names.extend(shortcodes_in_rich_element(element));
                }
            }
            Some("section") | Some("context") => {
                if let Some(text) = block
                    .get("text")
                    .and_then(|t| t.get("text"))
                    .and_then(|v| v.as_str())
                {
                    names.extend(shortcodes_in_text(text));
                }
                for field in block.get("fields").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                    if let Some(text) = field.get("text").and_then(|v| v.as_str()) {
                        names.extend(shortcodes_in_text(text));
                    }
                }
                for element in block.get("elements").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                    let element_type = element.get("type").and_then(|v| v.as_str());
                    if matches!(element_type, Some("mrkdwn") | Some("plain_text")) {
                        if let Some(text) = element.get("text").and_then(|v| v.as_str()) {
                            names.extend(shortcodes_in_text(text));
                        }
                    }
                }
            }
            Some("header") => {
                if let Some(text) = block
                    .get("text")
                    .and_then(|t| t.get("text"))
                    .and_then(|v| v.as_str())
                {
                    names.extend(shortcodes_in_text(text));
                }
            }
            _ => {}
        }
    }
    names
}

fn shortcodes_in_rich_element(element: &serde_json::Value) -> HashSet<String> {
    let mut names = HashSet::new();
    let element_type = element.get("type").and_then(|v| v.as_str());

    if element_type == Some("emoji") {
        if let Some(name) = element.get("name").and_then(|v| v.as_str()) {
            names.insert(name.to_string());
        }
    }
    for child in element.get("elements").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
        names.extend(shortcodes_in_rich_element(child));
    }
    if matches!(element_type, Some("text") | Some("mrkdwn") | Some("plain_text")) {
        if let Some(text) = element.get("text").and_then(|v| v.as_str()) {
            names.extend(shortcodes_in_text(text));
        }
    }
    names
}

/// Shortcodes in classic (pre-block) attachments
pub fn shortcodes_in_attachments(attachments: &[serde_json::Value]) -> HashSet<String> {
    let mut names = HashSet::new();
    for attachment in attachments {
        for key in ["pretext", "title", "text", "fallback"] {
            if let Some(text) = attachment.get(key).and_then(|v| v.as_str()) {
                names.extend(shortcodes_in_text(text));
            }
        }
    }
    names
}

/// All shortcodes referenced by one message
pub fn collect_message_shortcodes(message: &serde_json::Value) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Some(text) = message.get("text").and_then(|v| v.as_str()) {
        names.extend(shortcodes_in_text(text));
    }
    if let Some(blocks) = message.get("blocks").and_then(|v| v.as_array()) {
        names.extend(shortcodes_in_blocks(blocks));
    }
    if let Some(attachments) = message.get("attachments").and_then(|v| v.as_array()) {
        names.extend(shortcodes_in_attachments(attachments));
    }
    names
}

/// Resolve a Slack emoji name to its image URL, following `alias:` chains.
///
/// Cycles and chains deeper than 10 hops resolve to None.
pub fn resolve_emoji_url(name: &str, emoji_list: &HashMap<String, String>) -> Option<String> {
    let mut visited = HashSet::new();
    let mut current = name.to_string();
    for _ in 0..=10 {
        if !visited.insert(current.clone()) {
            return None;
        }
        let value = emoji_list.get(&current)?;
        if value.is_empty() {
            return None;
        }
        match value.strip_prefix("alias:") {
            Some(target) => current = target.to_string(),
            None => return Some(value.clone()),
        }
    }
    None
}

/// Scan the export for custom emoji usages and create `custom_emoji`
/// entities for every resolvable name not already stored.
pub async fn parse_custom_emojis(
    pool: &SqlitePool,
    extract_dir: &Path,
    folder_map: &HashMap<String, serde_json::Value>,
    emoji_list: &HashMap<String, String>,
    progress: &ProgressReporter,
) -> Result<u64> {
    if emoji_list.is_empty() {
        tracing::info!("Slack emoji list empty or unavailable; skipping custom emoji discovery");
        return Ok(0);
    }

    let mut wanted: HashSet<String> = HashSet::new();
    for folder in folder_map.keys() {
        let folder_path = extract_dir.join(folder);
        if !folder_path.is_dir() {
            continue;
        }
        for msg_file in super::daily_message_files(&folder_path) {
            match super::read_json_array(&msg_file) {
                Ok(messages) => {
                    for message in &messages {
                        wanted.extend(collect_message_shortcodes(message));
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Error reading {} while collecting custom emojis: {}",
                        msg_file.display(),
                        e
                    );
                }
            }
        }
    }

    let resolved: HashMap<String, String> = wanted
        .into_iter()
        .filter_map(|name| resolve_emoji_url(&name, emoji_list).map(|url| (name, url)))
        .collect();
    if resolved.is_empty() {
        tracing::info!("No custom emojis with Slack API URLs found in the export");
        return Ok(0);
    }

    let existing = db::entities::existing_slack_ids(pool, EntityType::CustomEmoji).await?;

    let mut created = 0u64;
    for (name, url) in resolved {
        if existing.contains(&name) {
            continue;
        }
        let raw = serde_json::json!({"name": name, "url": url});
        db::entities::insert_or_get(
            pool,
            EntityType::CustomEmoji,
            &name,
            &raw,
            MappingStatus::Pending,
            None,
        )
        .await?;
        created += 1;
        progress
            .add(ImportStage::Emojis, EntityType::CustomEmoji, "emojis_processed", 1)
            .await?;
    }

    tracing::info!("Custom emojis imported from export: {}", created);
    Ok(created)
}
