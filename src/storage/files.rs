//! Upload storage
//!
//! Files land in a single flat directory. Stored names are
//! `YYYYMMDD_HHMMSS_<id>_<sanitized original>`, so they sort by upload time
//! and two uploads with the same original name never collide.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::error::{AppError, AppResult};

/// Longest sanitized original name kept in a stored name
const MAX_NAME_LEN: usize = 128;

/// Longest stored name accepted by `open`/`remove`
const MAX_STORED_NAME_LEN: usize = MAX_NAME_LEN + 32;

/// A file in the upload directory
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub content_type: String,
}

/// Flat directory of uploaded files
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_bytes: u64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Rejects a payload of `size` bytes before it is read into memory.
    pub fn check_size(&self, size: u64) -> AppResult<()> {
        if size > self.max_bytes {
            return Err(AppError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Stores `bytes` under a unique name derived from `original_name`.
    pub async fn save(&self, original_name: &str, bytes: Bytes) -> AppResult<StoredFile> {
        self.check_size(bytes.len() as u64)?;

        fs_err::tokio::create_dir_all(&self.root).await?;

        let name = stored_name(original_name, Utc::now());
        let path = self.root.join(&name);
        let tmp = self.root.join(format!(".{}.part", name));
        fs_err::tokio::write(&tmp, &bytes).await?;
        fs_err::tokio::rename(&tmp, &path).await?;

        log::info!("Stored upload {} ({} bytes)", name, bytes.len());
        Ok(StoredFile {
            content_type: content_type_for(&name),
            size: bytes.len() as u64,
            modified: Utc::now(),
            name,
        })
    }

    /// Reads a stored file.
    pub async fn open(&self, name: &str) -> AppResult<(StoredFile, Vec<u8>)> {
        let path = self.resolve(name)?;
        let bytes = match fs_err::tokio::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(AppError::NotFound(name.to_string())),
            Err(e) => return Err(e.into()),
        };
        let meta = fs_err::tokio::metadata(&path).await?;
        let file = StoredFile {
            name: name.to_string(),
            size: bytes.len() as u64,
            modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
            content_type: content_type_for(name),
        };
        Ok((file, bytes))
    }

    /// All stored files, newest first. A missing directory is an empty list.
    pub async fn list(&self) -> AppResult<Vec<StoredFile>> {
        let mut entries = match fs_err::tokio::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push(StoredFile {
                size: meta.len(),
                modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
                content_type: content_type_for(&name),
                name,
            });
        }

        // Names start with the upload timestamp.
        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(files)
    }

    pub async fn remove(&self, name: &str) -> AppResult<()> {
        let path = self.resolve(name)?;
        match fs_err::tokio::remove_file(&path).await {
            Ok(()) => {
                log::info!("Removed upload {}", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        if !is_valid_stored_name(name) {
            return Err(AppError::Validation(format!("invalid file name: {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

/// Reduces a client-supplied file name to a safe basename.
///
/// Keeps `[A-Za-z0-9._-]`, replaces everything else with `_`, drops leading
/// dots and truncates to 128 characters. Never returns an empty string.
pub fn sanitize_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let trimmed: String = cleaned.trim_start_matches('.').chars().take(MAX_NAME_LEN).collect();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Public download URL of a stored file.
pub fn public_url(base_url: &str, name: &str) -> String {
    format!("{}/files/{}", base_url.trim_end_matches('/'), name)
}

fn stored_name(original: &str, now: DateTime<Utc>) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", now.format("%Y%m%d_%H%M%S"), &id[..8], sanitize_file_name(original))
}

fn is_valid_stored_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_STORED_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name).first_or_octet_stream().essence_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo 1.jpg"), "photo_1.jpg");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name("фото.png"), "____.png");
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name(&"a".repeat(300)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_public_url() {
        assert_eq!(public_url("http://host:3000/", "a.txt"), "http://host:3000/files/a.txt");
        assert_eq!(public_url("https://x.example", "b"), "https://x.example/files/b");
    }

    #[test]
    fn test_stored_name_layout() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z").unwrap().with_timezone(&Utc);
        let name = stored_name("my doc.txt", at);
        assert!(name.starts_with("20260301_123045_"));
        assert!(name.ends_with("_my_doc.txt"));
        assert!(is_valid_stored_name(&name));
    }

    #[tokio::test]
    async fn test_save_open_list_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("uploads"), 1024);

        assert!(store.list().await.unwrap().is_empty());

        let saved = store.save("notes.txt", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(saved.size, 5);
        assert_eq!(saved.content_type, "text/plain");

        let (meta, bytes) = store.open(&saved.name).await.unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(meta.name, saved.name);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, saved.name);

        store.remove(&saved.name).await.unwrap();
        assert!(matches!(store.open(&saved.name).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_oversized_upload() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), 4);
        let err = store.save("big.bin", Bytes::from_static(b"12345")).await.unwrap_err();
        assert!(matches!(err, AppError::TooLarge { size: 5, limit: 4 }));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), 1024);
        for name in ["../secret", "a/b", ".hidden", ""] {
            assert!(matches!(store.open(name).await, Err(AppError::Validation(_))), "{name}");
        }
    }
}
