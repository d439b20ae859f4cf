//! Zip archive extraction and file counting
//!
//! Slack exports are zip archives with the channel manifests at the top
//! level and one folder per channel holding daily message files. Extraction
//! runs on the blocking pool; the async pipeline only sees the result.

use smsync_common::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Top-level manifest files a Slack export may contain
pub const TOP_LEVEL_MANIFESTS: [&str; 5] = [
    "users.json",
    "channels.json",
    "groups.json",
    "dms.json",
    "mpims.json",
];

/// Extract a zip archive into a directory
pub async fn extract_zip(zip_path: &Path, extract_to: &Path) -> Result<()> {
    let zip_path = zip_path.to_path_buf();
    let extract_to = extract_to.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        tracing::debug!(
            "Extracting archive {} into {}",
            zip_path.display(),
            extract_to.display()
        );
        std::fs::create_dir_all(&extract_to)?;

        let file = std::fs::File::open(&zip_path)?;
        let mut archive = ::zip::ZipArchive::new(file)
            .map_err(|e| Error::Archive(format!("Cannot open archive: {e}")))?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| Error::Archive(format!("Cannot read archive entry: {e}")))?;

            // enclosed_name rejects entries escaping the extraction root
            let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                tracing::warn!("Skipping archive entry with unsafe path: {}", entry.name());
                continue;
            };
            let target = extract_to.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }

        tracing::debug!("Archive extracted: {}", extract_to.display());
        Ok(())
    })
    .await
    .map_err(|e| Error::Internal(format!("Extraction task panicked: {e}")))?
}

/// Count JSON files in an extracted export directory.
///
/// Returns the total plus the presence map for the top-level manifests, so
/// the orchestrator can tick the file counter as each manifest is parsed.
pub fn count_json_files_in_dir(base_dir: &Path) -> Result<(u64, HashMap<String, bool>)> {
    let mut total = 0u64;
    let mut presence = HashMap::new();

    for manifest in TOP_LEVEL_MANIFESTS {
        let exists = base_dir.join(manifest).exists();
        presence.insert(manifest.to_string(), exists);
        if exists {
            total += 1;
        }
    }

    for entry in std::fs::read_dir(base_dir)? {
        let path = entry?.path();
        if path.is_dir() {
            total += super::daily_message_files(&path).len() as u64;
        }
    }

    Ok((total, presence))
}

/// Count JSON files directly from a zip archive's central directory.
///
/// Used by the job registry to backfill `json_files_total` while extraction
/// is still running. Slack zips sometimes wrap everything in one folder, so
/// leading path segments are ignored: a single-segment manifest name counts
/// as top-level, any deeper `*.json` counts as a daily file.
pub async fn count_json_files_in_zip(zip_path: &Path) -> Result<u64> {
    let zip_path = zip_path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<u64> {
        let file = std::fs::File::open(&zip_path)?;
        let archive = ::zip::ZipArchive::new(file)
            .map_err(|e| Error::Archive(format!("Cannot open archive: {e}")))?;

        let mut total = 0u64;
        for name in archive.file_names() {
            if name.ends_with('/') {
                continue;
            }
            let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
            let Some(file_name) = parts.last() else {
                continue;
            };
            if parts.len() == 1 {
                if TOP_LEVEL_MANIFESTS.contains(file_name) {
                    total += 1;
                }
            } else if file_name.to_ascii_lowercase().ends_with(".json") {
                total += 1;
            }
        }
        Ok(total)
    })
    .await
    .map_err(|e| Error::Internal(format!("Archive scan task panicked: {e}")))?
}

/// Build a unique extraction directory path under the given parent
pub fn extraction_dir(parent: &Path) -> PathBuf {
    parent.join(format!("slack-extract-{}", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use ::zip::write::FileOptions;

    fn build_fixture_zip(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = FileOptions::default();

        writer.start_file("users.json", options).unwrap();
        writer.write_all(br#"[{"id": "U1", "name": "alice"}]"#).unwrap();

        writer.start_file("channels.json", options).unwrap();
        writer.write_all(br#"[{"id": "C1", "name": "general"}]"#).unwrap();

        writer.start_file("general/2024-01-01.json", options).unwrap();
        writer.write_all(br#"[{"ts": "1.0", "text": "hi"}]"#).unwrap();

        writer.start_file("general/2024-01-02.json", options).unwrap();
        writer.write_all(br#"[]"#).unwrap();

        // Non-JSON payload must not count
        writer.start_file("general/readme.txt", options).unwrap();
        writer.write_all(b"notes").unwrap();

        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extract_and_count_dir() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("export.zip");
        build_fixture_zip(&zip_path);

        let out = dir.path().join("out");
        extract_zip(&zip_path, &out).await.unwrap();

        assert!(out.join("users.json").exists());
        assert!(out.join("general/2024-01-01.json").exists());

        let (total, presence) = count_json_files_in_dir(&out).unwrap();
        // users.json + channels.json + two daily files
        assert_eq!(total, 4);
        assert!(presence["users.json"]);
        assert!(presence["channels.json"]);
        assert!(!presence["dms.json"]);
    }

    #[tokio::test]
    async fn test_count_from_zip_ignores_wrapper_folder() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("wrapped.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = ::zip::ZipWriter::new(file);
            let options = FileOptions::default();
            writer.start_file("export/users.json", options).unwrap();
            writer.write_all(b"[]").unwrap();
            writer.start_file("export/general/2024-01-01.json", options).unwrap();
            writer.write_all(b"[]").unwrap();
            writer.finish().unwrap();
        }

        // Nested manifests don't count as top-level, but the daily file and
        // the wrapped users.json (depth > 1, *.json) both do
        let total = count_json_files_in_zip(&zip_path).await.unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_count_from_flat_zip() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("export.zip");
        build_fixture_zip(&zip_path);

        let total = count_json_files_in_zip(&zip_path).await.unwrap();
        assert_eq!(total, 4);
    }
}
