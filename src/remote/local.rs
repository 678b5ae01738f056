//! Directory-backed remote store
//!
//! Stores objects as plain files under a root directory. The revision of an
//! object is the SHA-256 of its content, so a conditional write succeeds only
//! if nobody changed the file since it was read.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::{RemoteError, RemoteMetadata, RemoteObject, RemoteStore, WriteMode};
use crate::session::model::checksum;

pub struct DirectoryRemote {
    root: PathBuf,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, RemoteError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let valid = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid || relative.as_os_str().is_empty() {
            return Err(RemoteError::Api {
                status: 400,
                summary: format!("path/malformed_path/{}", path),
            });
        }
        Ok(self.root.join(relative))
    }

    async fn read_existing(&self, file: &Path) -> Result<Option<(Vec<u8>, RemoteMetadata)>, RemoteError> {
        let bytes = match fs_err::tokio::read(file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RemoteError::Io(e)),
        };
        let modified = fs_err::tokio::metadata(file)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        let metadata = RemoteMetadata {
            rev: checksum(&bytes),
            server_modified: modified,
            size: bytes.len() as u64,
        };
        Ok(Some((bytes, metadata)))
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemote {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let file = self.resolve(path)?;
        Ok(self.read_existing(&file).await?.map(|(bytes, metadata)| RemoteObject {
            bytes: Bytes::from(bytes),
            metadata,
        }))
    }

    async fn put(&self, path: &str, bytes: Bytes, mode: WriteMode) -> Result<RemoteMetadata, RemoteError> {
        let file = self.resolve(path)?;

        if let WriteMode::Update(expected) = &mode {
            let current = self.read_existing(&file).await?.map(|(_, meta)| meta.rev);
            if current.as_deref() != Some(expected.as_str()) {
                return Err(RemoteError::Conflict(path.to_string()));
            }
        }

        if let Some(parent) = file.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let tmp = file.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs_err::tokio::write(&tmp, &bytes).await?;
        fs_err::tokio::rename(&tmp, &file).await?;

        Ok(RemoteMetadata {
            rev: checksum(&bytes),
            server_modified: Some(Utc::now()),
            size: bytes.len() as u64,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let file = self.resolve(path)?;
        match fs_err::tokio::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RemoteError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_fetch_delete() {
        let dir = TempDir::new().unwrap();
        let remote = DirectoryRemote::new(dir.path());

        assert!(remote.fetch("/a/b.json").await.unwrap().is_none());

        let meta = remote
            .put("/a/b.json", Bytes::from_static(b"hello"), WriteMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(meta.size, 5);

        let object = remote.fetch("/a/b.json").await.unwrap().unwrap();
        assert_eq!(&object.bytes[..], b"hello");
        assert_eq!(object.metadata.rev, meta.rev);

        remote.delete("/a/b.json").await.unwrap();
        remote.delete("/a/b.json").await.unwrap();
        assert!(remote.fetch("/a/b.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_mode_detects_conflict() {
        let dir = TempDir::new().unwrap();
        let remote = DirectoryRemote::new(dir.path());

        let first = remote
            .put("/s.json", Bytes::from_static(b"v1"), WriteMode::Overwrite)
            .await
            .unwrap();
        let second = remote
            .put("/s.json", Bytes::from_static(b"v2"), WriteMode::Update(first.rev.clone()))
            .await
            .unwrap();

        let stale = remote
            .put("/s.json", Bytes::from_static(b"v3"), WriteMode::Update(first.rev))
            .await;
        assert!(matches!(stale, Err(RemoteError::Conflict(_))));

        let object = remote.fetch("/s.json").await.unwrap().unwrap();
        assert_eq!(object.metadata.rev, second.rev);
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = TempDir::new().unwrap();
        let remote = DirectoryRemote::new(dir.path());
        assert!(remote.fetch("/../etc/passwd").await.is_err());
        assert!(remote.fetch("/").await.is_err());
    }
}
