//! Slack message text conversion
//!
//! Converts Slack's wire formats (mrkdwn markup, block kit payloads,
//! classic attachments) into Mattermost-friendly Markdown, plus the emoji
//! name normalization used by the reaction and emoji exporters.
//!
//! Mention resolution is split in two passes: the exporters collect the
//! referenced user/channel ids, look them up in the mapping store, and hand
//! the conversion a prebuilt [`MentionResolver`], which keeps everything
//! here synchronous and directly testable.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn user_mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<@([A-Z0-9]+)(?:\|[^>]+)?>").unwrap())
}

fn channel_mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<#([A-Z0-9]+)(?:\|[^>]+)?>").unwrap())
}

fn labeled_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<((?:https?|mailto):[^>|]+)\|([^>]+)>").unwrap())
}

fn naked_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<((?:https?|mailto):[^>]+)>").unwrap())
}

/// Resolved Slack id → display name maps for mention rewriting
#[derive(Debug, Default)]
pub struct MentionResolver {
    pub users: HashMap<String, String>,
    pub channels: HashMap<String, String>,
}

impl MentionResolver {
    fn username(&self, id: &str) -> String {
        self.users.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn channel_name(&self, id: &str) -> String {
        self.channels.get(id).cloned().unwrap_or_else(|| id.to_string())
    }
}

/// User and channel ids referenced by a text fragment
pub fn mention_ids_in_text(text: &str) -> (HashSet<String>, HashSet<String>) {
    let users = user_mention_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    let channels = channel_mention_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    (users, channels)
}

/// User and channel ids referenced by a block kit payload
pub fn mention_ids_in_blocks(
    blocks: &[serde_json::Value],
) -> (HashSet<String>, HashSet<String>) {
    let mut users = HashSet::new();
    let mut channels = HashSet::new();
    for block in blocks {
        collect_block_mentions(block, &mut users, &mut channels);
    }
    (users, channels)
}

fn collect_block_mentions(
    value: &serde_json::Value,
    users: &mut HashSet<String>,
    channels: &mut HashSet<String>,
) {
    match value.get("type").and_then(|v| v.as_str()) {
        Some("user") => {
            if let Some(id) = value.get("user_id").and_then(|v| v.as_str()) {
                users.insert(id.to_string());
            }
        }
        Some("channel") => {
            if let Some(id) = value.get("channel_id").and_then(|v| v.as_str()) {
                channels.insert(id.to_string());
            }
        }
        Some("text") | Some("mrkdwn") | Some("plain_text") => {
            if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                let (u, c) = mention_ids_in_text(text);
                users.extend(u);
                channels.extend(c);
            }
        }
        _ => {}
    }
    // Text objects nest under "text", items under "elements"/"fields"
    if let Some(text) = value.get("text").filter(|t| t.is_object()) {
        collect_block_mentions(text, users, channels);
    }
    for key in ["elements", "fields"] {
        for child in value.get(key).and_then(|v| v.as_array()).unwrap_or(&vec![]) {
            collect_block_mentions(child, users, channels);
        }
    }
}

/// Convert Slack mrkdwn markup to Markdown
pub fn slack_text_to_markdown(resolver: &MentionResolver, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Special mentions
    let mut out = text
        .replace("<!here>", "@here")
        .replace("<!channel>", "@channel")
        .replace("<!everyone>", "@all");

    // Links with labels: <url|label>
    out = labeled_link_pattern()
        .replace_all(&out, "[$2]($1)")
        .into_owned();

    // Naked angled links: <url>
    out = naked_link_pattern().replace_all(&out, "$1").into_owned();

    // User mentions: <@U12345|optional>
    out = user_mention_pattern()
        .replace_all(&out, |caps: &regex::Captures| {
            format!("@{}", resolver.username(&caps[1]))
        })
        .into_owned();

    // Channel mentions: <#C12345|optional>
    out = channel_mention_pattern()
        .replace_all(&out, |caps: &regex::Captures| {
            format!("~{}", resolver.channel_name(&caps[1]))
        })
        .into_owned();

    out
}

/// Convert a block kit payload to Markdown, one line per block
pub fn blocks_to_markdown(resolver: &MentionResolver, blocks: &[serde_json::Value]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("rich_text") => {
                for element in block.get("elements").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                    let rendered = rich_element_to_md(resolver, element);
                    if !rendered.is_empty() {
                        lines.push(rendered);
                    }
                }
            }
            Some("section") => {
                if let Some(text_obj) = block.get("text").filter(|t| t.is_object()) {
                    lines.push(text_object_to_md(resolver, text_obj));
                } else {
                    for field in block.get("fields").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                        if field.is_object() {
                            lines.push(text_object_to_md(resolver, field));
                        }
                    }
                }
            }
            Some("header") => {
                let text = block
                    .get("text")
                    .and_then(|t| t.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if !text.is_empty() {
                    lines.push(format!("# {text}"));
                }
            }
            Some("divider") => lines.push("---".to_string()),
            Some("context") => {
                let mut items = Vec::new();
                for element in block.get("elements").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                    let element_type = element.get("type").and_then(|v| v.as_str());
                    let rendered = if matches!(element_type, Some("plain_text") | Some("mrkdwn")) {
                        text_object_to_md(resolver, element)
                    } else {
                        rich_element_to_md(resolver, element)
                    };
                    if !rendered.is_empty() {
                        items.push(rendered);
                    }
                }
                if !items.is_empty() {
                    lines.push(items.join(" "));
                }
            }
            Some("image") => {
                let url = block.get("image_url").and_then(|v| v.as_str()).unwrap_or_default();
                let alt = block.get("alt_text").and_then(|v| v.as_str()).unwrap_or_default();
                if !url.is_empty() {
                    if alt.is_empty() {
                        lines.push(url.to_string());
                    } else {
                        lines.push(format!("![{alt}]({url})"));
                    }
                }
            }
            _ => {}
        }
    }
    lines.join("\n")
}

fn text_object_to_md(resolver: &MentionResolver, text_obj: &serde_json::Value) -> String {
    let text = text_obj.get("text").and_then(|v| v.as_str()).unwrap_or_default();
    if text_obj.get("type").and_then(|v| v.as_str()) == Some("mrkdwn") {
        slack_text_to_markdown(resolver, text)
    } else {
        text.to_string()
    }
}

fn rich_element_to_md(resolver: &MentionResolver, element: &serde_json::Value) -> String {
    let children = || {
        element
            .get("elements")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };
    let render_children = |resolver: &MentionResolver| {
        children()
            .iter()
            .map(|child| rich_element_to_md(resolver, child))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    };

    match element.get("type").and_then(|v| v.as_str()) {
        Some("rich_text_section") => render_children(resolver).join(""),
        Some("rich_text_list") => {
            let bullet = if element.get("style").and_then(|v| v.as_str()) == Some("ordered") {
                "1. "
            } else {
                "- "
            };
            let mut out = Vec::new();
            for item in children() {
                let text = rich_element_to_md(resolver, &item);
                for line in text.lines() {
                    out.push(format!("{bullet}{line}"));
                }
            }
            out.join("\n")
        }
        Some("rich_text_quote") => {
            let content = render_children(resolver).join("");
            content
                .lines()
                .map(|line| format!("> {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Some("rich_text_preformatted") => {
            let content = render_children(resolver).join("");
            format!("```\n{content}\n```")
        }
        Some("rich_text_line_break") => "\n".to_string(),
        Some("text") => {
            let text = element.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            let style = element.get("style");
            let styled = |key: &str| {
                style
                    .and_then(|s| s.get(key))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            };
            if styled("code") {
                return format!("`{text}`");
            }
            let mut out = text.to_string();
            if styled("bold") {
                out = format!("**{out}**");
            }
            if styled("italic") {
                out = format!("_{out}_");
            }
            if styled("strike") {
                out = format!("~~{out}~~");
            }
            out
        }
        Some("emoji") => element
            .get("name")
            .and_then(|v| v.as_str())
            .map(|name| format!(":{name}:"))
            .unwrap_or_default(),
        Some("user") => element
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(|id| format!("@{}", resolver.username(id)))
            .unwrap_or_default(),
        Some("usergroup") => element
            .get("usergroup_id")
            .and_then(|v| v.as_str())
            .map(|id| format!("@{id}"))
            .unwrap_or_default(),
        Some("channel") => element
            .get("channel_id")
            .and_then(|v| v.as_str())
            .map(|id| format!("~{}", resolver.channel_name(id)))
            .unwrap_or_default(),
        Some("link") => {
            let url = element.get("url").and_then(|v| v.as_str()).unwrap_or_default();
            let text = element
                .get("text")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .unwrap_or(url);
            if url.is_empty() {
                text.to_string()
            } else {
                format!("[{text}]({url})")
            }
        }
        Some("date") => element
            .get("timestamp")
            .map(|ts| ts.to_string())
            .unwrap_or_default(),
        _ => render_children(resolver).join(""),
    }
}

/// Convert classic (pre-block) attachments to Markdown, separated by rules
pub fn attachments_to_markdown(
    resolver: &MentionResolver,
    attachments: &[serde_json::Value],
) -> String {
    let mut parts = Vec::new();
    for attachment in attachments {
        let mut lines = Vec::new();

        if let Some(pretext) = attachment.get("pretext").and_then(|v| v.as_str()) {
            lines.push(slack_text_to_markdown(resolver, pretext));
        }
        if let Some(title) = attachment.get("title").and_then(|v| v.as_str()) {
            match attachment.get("title_link").and_then(|v| v.as_str()) {
                Some(link) => lines.push(format!("[{title}]({link})")),
                None => lines.push(format!("**{title}**")),
            }
        }
        if let Some(text) = attachment.get("text").and_then(|v| v.as_str()) {
            lines.push(slack_text_to_markdown(resolver, text));
        }

        let mut action_links = Vec::new();
        for action in attachment.get("actions").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
            let text = action.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            let url = action.get("url").and_then(|v| v.as_str()).unwrap_or_default();
            match (text.is_empty(), url.is_empty()) {
                (false, false) => action_links.push(format!("[{text}]({url})")),
                (false, true) => action_links.push(text.to_string()),
                _ => {}
            }
        }
        if !action_links.is_empty() {
            lines.push(action_links.join(" "));
        }

        if lines.is_empty() {
            if let Some(fallback) = attachment.get("fallback").and_then(|v| v.as_str()) {
                lines.push(slack_text_to_markdown(resolver, fallback));
            }
        }
        if !lines.is_empty() {
            parts.push(lines.join("\n"));
        }
    }
    parts.join("\n\n---\n\n")
}

/// Transliterate Cyrillic to Latin and sanitize to an emoji-safe name
/// (`[a-zA-Z0-9_]`, collapsed underscores)
pub fn transliterate_cyrillic(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match cyrillic_to_latin(ch) {
            Some(latin) => out.push_str(latin),
            None => out.push(ch),
        }
    }

    let mut sanitized = String::with_capacity(out.len());
    let mut last_was_underscore = false;
    for ch in out.chars() {
        if ch.is_ascii_alphanumeric() {
            sanitized.push(ch);
            last_was_underscore = false;
        } else if !last_was_underscore {
            sanitized.push('_');
            last_was_underscore = true;
        }
    }
    sanitized.trim_matches('_').to_string()
}

fn cyrillic_to_latin(ch: char) -> Option<&'static str> {
    Some(match ch {
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d",
        'е' => "e", 'ё' => "yo", 'ж' => "zh", 'з' => "z", 'и' => "i",
        'й' => "y", 'к' => "k", 'л' => "l", 'м' => "m", 'н' => "n",
        'о' => "o", 'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t",
        'у' => "u", 'ф' => "f", 'х' => "h", 'ц' => "ts", 'ч' => "ch",
        'ш' => "sh", 'щ' => "sch", 'ъ' => "", 'ы' => "y", 'ь' => "",
        'э' => "e", 'ю' => "yu", 'я' => "ya",
        'А' => "A", 'Б' => "B", 'В' => "V", 'Г' => "G", 'Д' => "D",
        'Е' => "E", 'Ё' => "YO", 'Ж' => "ZH", 'З' => "Z", 'И' => "I",
        'Й' => "Y", 'К' => "K", 'Л' => "L", 'М' => "M", 'Н' => "N",
        'О' => "O", 'П' => "P", 'Р' => "R", 'С' => "S", 'Т' => "T",
        'У' => "U", 'Ф' => "F", 'Х' => "H", 'Ц' => "TS", 'Ч' => "CH",
        'Ш' => "SH", 'Щ' => "SCH", 'Ъ' => "", 'Ы' => "Y", 'Ь' => "",
        'Э' => "E", 'Ю' => "YU", 'Я' => "YA",
        _ => return None,
    })
}

/// Strip Slack skin-tone suffixes and map Slack aliases to Mattermost names
pub fn normalize_standard_emoji(name: &str) -> String {
    let mut base = name;
    for tone in 1..=6 {
        let suffix = format!("::skin-tone-{tone}");
        if let Some(stripped) = base.strip_suffix(suffix.as_str()) {
            base = stripped;
            break;
        }
    }
    match base {
        "+1" => "thumbs_up".to_string(),
        "-1" => "thumbs_down".to_string(),
        other => other.to_string(),
    }
}

/// Candidate emoji names to try against Mattermost, most likely first
pub fn emoji_candidates(original: &str) -> Vec<String> {
    let base = normalize_standard_emoji(original);
    match base.as_str() {
        "thumbs_up" => vec!["thumbs_up".into(), "thumbsup".into(), "+1".into()],
        "thumbs_down" => vec!["thumbs_down".into(), "thumbsdown".into(), "-1".into()],
        _ => vec![base],
    }
}

/// Clamp a channel display name to Mattermost limits: non-empty, single
/// line, at most 64 characters
pub fn sanitize_display_name(display_name: Option<&str>, fallback: &str) -> String {
    let mut value = display_name
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string();
    if value.chars().count() > 64 {
        value = value.chars().take(64).collect();
    }
    if value.is_empty() {
        value = fallback.chars().take(64).collect();
        if value.is_empty() {
            value = "channel".to_string();
        }
    }
    value
}
