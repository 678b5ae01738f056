//! Local session file storage
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-write leaves either the old or the new envelope, never a torn one.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::SessionError;
use super::model::Session;

/// Session file on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalSessionStore {
    path: PathBuf,
}

impl LocalSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the session.
    ///
    /// Returns `Ok(None)` when the file does not exist and
    /// `Err(SessionError::Corrupt)` when it exists but fails validation.
    pub async fn load(&self) -> Result<Option<Session>, SessionError> {
        let bytes = match fs_err::tokio::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::Io(e)),
        };
        Session::decode(&bytes).map(Some)
    }

    /// Atomically replaces the session file.
    pub async fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::tokio::create_dir_all(parent).await?;
            }
        }

        let bytes = session.encode()?;
        let tmp = self.temp_path();
        fs_err::tokio::write(&tmp, &bytes).await?;
        if let Err(e) = fs_err::tokio::rename(&tmp, &self.path).await {
            let _ = fs_err::tokio::remove_file(&tmp).await;
            return Err(SessionError::Io(e));
        }
        log::debug!("Saved session {} to {}", session.short_checksum(), self.path.display());
        Ok(())
    }

    /// Deletes the session file. A missing file is not an error.
    pub async fn remove(&self) -> Result<(), SessionError> {
        match fs_err::tokio::remove_file(&self.path).await {
            Ok(()) => {
                log::info!("Removed local session file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    /// Moves a corrupt file aside as `<name>.corrupt-<timestamp>`.
    ///
    /// Returns the new path, or `None` if there was nothing to move.
    pub async fn quarantine(&self) -> Result<Option<PathBuf>, SessionError> {
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("session");
        let target = self
            .path
            .with_file_name(format!("{}.corrupt-{}", file_name, Utc::now().format("%Y%m%d_%H%M%S")));

        match fs_err::tokio::rename(&self.path, &target).await {
            Ok(()) => {
                log::warn!("Quarantined corrupt session file to {}", target.display());
                Ok(Some(target))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("session");
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path().join("s.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path().join("nested/dir/s.json"));
        let session = Session::new(b"blob".to_vec()).unwrap();

        store.save(&session).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, session);

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nested/dir")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, b"{\"version\":1}").unwrap();

        let store = LocalSessionStore::new(&path);
        assert!(store.load().await.unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_quarantine_moves_file_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, b"garbage").unwrap();

        let store = LocalSessionStore::new(&path);
        let moved = store.quarantine().await.unwrap().unwrap();
        assert!(!path.exists());
        assert!(moved.exists());
        assert!(moved.file_name().unwrap().to_str().unwrap().starts_with("s.json.corrupt-"));

        assert!(store.quarantine().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path().join("s.json"));
        store.save(&Session::new(b"x".to_vec()).unwrap()).await.unwrap();

        store.remove().await.unwrap();
        store.remove().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
