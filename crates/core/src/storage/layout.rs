//! Path resolution, upload dedup and output placement.

use chrono::{Datelike, NaiveDate, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::StorageConfig;
use super::error::StorageError;
use crate::fingerprint::ContentFingerprinter;
use crate::format::{normalize_format, Category};

const MAX_BASENAME_LEN: usize = 64;

/// Reduces a file stem to `[A-Za-z0-9_-]`, replacing everything else with
/// `_`. Never returns an empty string.
pub fn sanitize_basename(stem: &str) -> String {
    let cleaned: String = stem
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_BASENAME_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('_');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn split_name(original_name: &str) -> (String, Option<String>) {
    let path = Path::new(original_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| normalize_format(&e.to_string_lossy()))
        .filter(|e| !e.is_empty());
    (sanitize_basename(&stem), ext)
}

fn short(id: &str) -> String {
    id.chars().filter(|c| *c != '-').take(8).collect()
}

/// A file that lives in one of the storage roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub physical_path: PathBuf,
    pub category: Category,
    pub date: NaiveDate,
    pub user_id: Option<String>,
    pub content_hash: String,
    pub unique_id: String,
    /// An existing upload with the same content was reused.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UploadKey {
    hash: String,
    category: Category,
    user_id: Option<String>,
}

/// Resolves and manages paths under the storage roots.
#[derive(Debug)]
pub struct StorageLayout {
    config: StorageConfig,
    fingerprinter: ContentFingerprinter,
    uploads: Mutex<HashMap<UploadKey, StoredFile>>,
}

impl StorageLayout {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            fingerprinter: ContentFingerprinter::default(),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `fingerprinter` for upload content hashes.
    pub fn with_fingerprinter(mut self, fingerprinter: ContentFingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn uploads_root(&self) -> &Path {
        &self.config.uploads_dir
    }

    pub fn outputs_root(&self) -> &Path {
        &self.config.outputs_dir
    }

    pub fn scratch_root(&self) -> &Path {
        &self.config.scratch_dir
    }

    /// Every root the retention sweeper should walk.
    pub fn roots(&self) -> Vec<PathBuf> {
        vec![
            self.config.uploads_dir.clone(),
            self.config.outputs_dir.clone(),
            self.config.scratch_dir.clone(),
        ]
    }

    fn partition(
        root: &Path,
        category: Category,
        user_id: Option<&str>,
        date: NaiveDate,
    ) -> PathBuf {
        let mut dir = root.join(category.as_str());
        if let Some(user) = user_id {
            dir.push(format!("user_{}", sanitize_basename(user)));
        }
        dir.join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    fn file_name(basename: &str, hash: &str, unique_id: &str, ext: Option<&str>) -> String {
        let mut name = format!("{}_{}_{}", basename, short(hash), short(unique_id));
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(ext);
        }
        name
    }

    /// Path for a stored upload, keeping the original extension.
    pub fn resolve_upload_path(
        &self,
        category: Category,
        user_id: Option<&str>,
        hash: &str,
        unique_id: &str,
        original_name: &str,
    ) -> PathBuf {
        let (basename, ext) = split_name(original_name);
        Self::partition(&self.config.uploads_dir, category, user_id, today())
            .join(Self::file_name(&basename, hash, unique_id, ext.as_deref()))
    }

    /// Path for a conversion output with the target extension.
    pub fn resolve_output_path(
        &self,
        category: Category,
        user_id: Option<&str>,
        hash: &str,
        unique_id: &str,
        original_name: &str,
        target_format: &str,
    ) -> PathBuf {
        let (basename, _) = split_name(original_name);
        let ext = normalize_format(target_format);
        Self::partition(&self.config.outputs_dir, category, user_id, today())
            .join(Self::file_name(&basename, hash, unique_id, Some(&ext)))
    }

    /// Copies `source` into the uploads root. A file with the same content
    /// hash (same category and user) that is still on disk is reused.
    pub async fn store_upload(
        &self,
        source: &Path,
        category: Category,
        user_id: Option<&str>,
    ) -> Result<StoredFile, StorageError> {
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(StorageError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        let hash = self.fingerprinter.prefix_hash(source).await?;
        let key = UploadKey {
            hash: hash.clone(),
            category,
            user_id: user_id.map(str::to_string),
        };

        let mut uploads = self.uploads.lock().await;
        if let Some(existing) = uploads.get(&key) {
            if fs::try_exists(&existing.physical_path).await.unwrap_or(false) {
                debug!(
                    hash = %hash,
                    path = %existing.physical_path.display(),
                    "Reusing stored upload"
                );
                return Ok(StoredFile {
                    deduplicated: true,
                    ..existing.clone()
                });
            }
            uploads.remove(&key);
        }

        let unique_id = Uuid::new_v4().to_string();
        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination =
            self.resolve_upload_path(category, user_id, &hash, &unique_id, &original_name);
        ensure_parent_dirs(&destination).await?;

        fs::copy(source, &destination).await.map_err(|e| {
            StorageError::copy_failed(source.to_path_buf(), destination.clone(), e)
        })?;

        info!(
            category = %category,
            path = %destination.display(),
            "Stored upload"
        );

        let stored = StoredFile {
            physical_path: destination,
            category,
            date: today(),
            user_id: user_id.map(str::to_string),
            content_hash: hash,
            unique_id,
            deduplicated: false,
        };
        uploads.insert(key, stored.clone());
        Ok(stored)
    }

    /// Moves a produced artifact into the outputs root.
    pub async fn place_output(
        &self,
        produced: &Path,
        category: Category,
        user_id: Option<&str>,
        hash: &str,
        original_name: &str,
        target_format: &str,
    ) -> Result<StoredFile, StorageError> {
        let unique_id = Uuid::new_v4().to_string();
        let destination = self.resolve_output_path(
            category,
            user_id,
            hash,
            &unique_id,
            original_name,
            target_format,
        );
        ensure_parent_dirs(&destination).await?;

        if !try_atomic_move(produced, &destination).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::SourceNotFound {
                    path: produced.to_path_buf(),
                }
            } else {
                StorageError::move_failed(produced.to_path_buf(), destination.clone(), e)
            }
        })? {
            debug!(
                source = %produced.display(),
                destination = %destination.display(),
                "Rename crossed filesystems, copying"
            );
            fs::copy(produced, &destination).await.map_err(|e| {
                StorageError::copy_failed(produced.to_path_buf(), destination.clone(), e)
            })?;
            if let Err(e) = fs::remove_file(produced).await {
                warn!(path = %produced.display(), error = %e, "Failed to remove moved source");
            }
        }

        Ok(StoredFile {
            physical_path: destination,
            category,
            date: today(),
            user_id: user_id.map(str::to_string),
            content_hash: hash.to_string(),
            unique_id,
            deduplicated: false,
        })
    }

    fn is_within_roots(&self, path: &Path) -> bool {
        let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
        !escapes && self.roots().iter().any(|root| path.starts_with(root))
    }

    /// Public URL for a stored path.
    pub fn url_for(&self, path: &Path) -> String {
        let relative = |root: &Path| {
            path.strip_prefix(root).ok().map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
        };

        if let Some(rel) = relative(&self.config.uploads_dir) {
            return format!("/uploads/{}", rel);
        }
        if let Some(rel) = relative(&self.config.outputs_dir) {
            return format!("/outputs/{}", rel);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("/file/{}", name)
    }

    /// Deletes files that belong to a finished request. Missing files are
    /// skipped; returns how many were removed.
    pub async fn remove_files(&self, paths: &[PathBuf]) -> Result<usize, StorageError> {
        if let Some(outside) = paths.iter().find(|p| !self.is_within_roots(p)) {
            return Err(StorageError::OutsideRoots {
                path: outside.clone(),
            });
        }

        let mut removed = 0;
        for path in paths {
            match fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.uploads
            .lock()
            .await
            .retain(|_, stored| !paths.contains(&stored.physical_path));
        Ok(removed)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn ensure_parent_dirs(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

/// Attempts to move a file atomically (rename). `Ok(false)` means the
/// rename crossed filesystems and the caller should copy instead.
async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(true),
        Err(e) => {
            // EXDEV is 18 on Linux
            if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                Ok(false)
            } else {
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> StorageLayout {
        StorageLayout::new(StorageConfig::under(dir.path()))
    }

    fn date_dirs() -> PathBuf {
        let d = today();
        PathBuf::from(format!("{:04}", d.year()))
            .join(format!("{:02}", d.month()))
            .join(format!("{:02}", d.day()))
    }

    #[test]
    fn test_sanitize_basename() {
        assert_eq!(sanitize_basename("export file"), "export_file");
        assert_eq!(sanitize_basename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_basename("  "), "file");
        assert_eq!(sanitize_basename("résumé-v2"), "r_sum_-v2");
        assert_eq!(sanitize_basename(&"a".repeat(200)).len(), MAX_BASENAME_LEN);
    }

    #[test]
    fn test_resolve_output_path_layout() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let path = layout.resolve_output_path(
            Category::Document,
            Some("42"),
            "0123456789abcdef",
            "a1b2c3d4-e5f6-7890-abcd-ef0123456789",
            "My Report.docx",
            "PDF",
        );

        let expected = dir
            .path()
            .join("outputs")
            .join("document")
            .join("user_42")
            .join(date_dirs())
            .join("My_Report_01234567_a1b2c3d4.pdf");
        assert_eq!(path, expected);
    }

    #[test]
    fn test_resolve_upload_path_without_user() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let path = layout.resolve_upload_path(
            Category::Image,
            None,
            "ffffffff00",
            "12345678",
            "photo.JPEG",
        );
        assert_eq!(
            path,
            dir.path()
                .join("uploads")
                .join("image")
                .join(date_dirs())
                .join("photo_ffffffff_12345678.jpg")
        );
    }

    #[tokio::test]
    async fn test_store_upload_deduplicates_by_hash() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "same content").unwrap();
        std::fs::write(&b, "same content").unwrap();

        let first = layout.store_upload(&a, Category::Text, None).await.unwrap();
        let second = layout.store_upload(&b, Category::Text, None).await.unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.physical_path, second.physical_path);
        assert!(first.physical_path.starts_with(layout.uploads_root()));

        let other_user = layout
            .store_upload(&b, Category::Text, Some("7"))
            .await
            .unwrap();
        assert_ne!(other_user.physical_path, first.physical_path);
    }

    #[tokio::test]
    async fn test_store_upload_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = layout(&dir)
            .store_upload(&dir.path().join("nope.txt"), Category::Text, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_store_upload_recopies_after_deletion() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "content").unwrap();

        let first = layout.store_upload(&a, Category::Text, None).await.unwrap();
        std::fs::remove_file(&first.physical_path).unwrap();
        let second = layout.store_upload(&a, Category::Text, None).await.unwrap();

        assert!(!second.deduplicated);
        assert!(second.physical_path.exists());
    }

    #[tokio::test]
    async fn test_place_output_moves_file() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let produced = dir.path().join("produced.pdf");
        std::fs::write(&produced, b"%PDF").unwrap();

        let stored = layout
            .place_output(&produced, Category::Document, None, "abcdef1234", "report.docx", "pdf")
            .await
            .unwrap();

        assert!(!produced.exists());
        assert_eq!(std::fs::read(&stored.physical_path).unwrap(), b"%PDF");
        assert!(stored.physical_path.starts_with(layout.outputs_root()));
        let name = stored.physical_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("report_abcdef12_"));
        assert!(name.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn test_place_output_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = layout(&dir)
            .place_output(&dir.path().join("gone"), Category::Text, None, "aa", "x.txt", "md")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SourceNotFound { .. }));
    }

    #[test]
    fn test_url_for() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);

        let upload = layout.uploads_root().join("text/2024/01/02/a_1_2.txt");
        assert_eq!(layout.url_for(&upload), "/uploads/text/2024/01/02/a_1_2.txt");

        let output = layout.outputs_root().join("image").join("user_3").join("b.png");
        assert_eq!(layout.url_for(&output), "/outputs/image/user_3/b.png");

        assert_eq!(layout.url_for(Path::new("/tmp/elsewhere/c.zip")), "/file/c.zip");
    }

    #[test]
    fn test_roots() {
        let dir = TempDir::new().unwrap();
        let roots = layout(&dir).roots();
        assert_eq!(roots.len(), 3);
        assert!(roots.contains(&dir.path().join("outputs")));
    }

    #[tokio::test]
    async fn test_remove_files_refuses_outside_roots() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let outside = dir.path().join("keep.txt");
        std::fs::write(&outside, "x").unwrap();

        let err = layout.remove_files(&[outside.clone()]).await.unwrap_err();
        assert!(matches!(err, StorageError::OutsideRoots { .. }));
        assert!(outside.exists());

        let sneaky = layout.outputs_root().join("..").join("keep.txt");
        assert!(layout.remove_files(&[sneaky]).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_files_skips_missing() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let source = dir.path().join("in.txt");
        std::fs::write(&source, "hello").unwrap();
        let stored = layout.store_upload(&source, Category::Text, None).await.unwrap();
        let missing = layout.outputs_root().join("never-written.txt");

        let removed = layout
            .remove_files(&[stored.physical_path.clone(), missing])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(!stored.physical_path.exists());
    }
}
