//! Uploaded archive storage
//!
//! Uploads stream into uniquely-named files under the configured upload
//! directory; the import pipeline owns the file from then on and deletes it
//! when the job finishes.

use std::path::{Path, PathBuf};

/// Build a unique path for an incoming upload, keeping the original
/// extension so the zip check stays meaningful.
pub fn temp_archive_path(upload_dir: &Path, original_name: &str) -> PathBuf {
    let suffix = Path::new(original_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| ".tmp".to_string());
    upload_dir.join(format!("slack-upload-{}{}", uuid::Uuid::new_v4(), suffix))
}

/// Whether the stored file is a zip archive by name
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Delete a file, logging rather than propagating failure
pub async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::error!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_keeps_extension() {
        let path = temp_archive_path(Path::new("/tmp"), "backup.zip");
        assert!(path.to_string_lossy().ends_with(".zip"));
        assert!(path.to_string_lossy().contains("slack-upload-"));
        assert!(is_zip(&path));
    }

    #[test]
    fn test_temp_path_without_extension() {
        let path = temp_archive_path(Path::new("/tmp"), "upload");
        assert!(path.to_string_lossy().ends_with(".tmp"));
        assert!(!is_zip(&path));
    }

    #[test]
    fn test_unique_per_call() {
        let a = temp_archive_path(Path::new("/tmp"), "a.zip");
        let b = temp_archive_path(Path::new("/tmp"), "a.zip");
        assert_ne!(a, b);
    }
}
