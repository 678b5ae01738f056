//! Remote storage for the session backup
//!
//! The session manager only sees the [`RemoteStore`] trait. Dropbox is the
//! production backend; [`DirectoryRemote`] keeps the backup in a local (or
//! network-mounted) directory.

pub mod dropbox;
pub mod error;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::config::{RemoteBackend, Settings};

pub use dropbox::{DropboxClient, DropboxEndpoints};
pub use error::RemoteError;
pub use local::DirectoryRemote;

/// Metadata the remote returns for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    /// Opaque revision id, changes on every write
    pub rev: String,
    pub server_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Object content plus metadata
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub bytes: Bytes,
    pub metadata: RemoteMetadata,
}

/// How an upload treats an existing object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever is there
    Overwrite,
    /// Replace only if the current revision matches; otherwise `RemoteError::Conflict`
    Update(String),
}

/// A key/value file store addressed by path.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name for logs and status output.
    fn name(&self) -> &str;

    /// Downloads an object. `Ok(None)` when it does not exist.
    async fn fetch(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError>;

    /// Uploads an object and returns its new metadata.
    async fn put(&self, path: &str, bytes: Bytes, mode: WriteMode) -> Result<RemoteMetadata, RemoteError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;
}

/// Builds the configured backend, or `None` when no remote is configured.
pub fn from_settings(settings: &Settings) -> Result<Option<Arc<dyn RemoteStore>>, RemoteError> {
    match &settings.remote {
        RemoteBackend::Dropbox(auth) => {
            let client = DropboxClient::new(auth.clone(), DropboxEndpoints::default())?;
            Ok(Some(Arc::new(client)))
        }
        RemoteBackend::Directory(dir) => Ok(Some(Arc::new(DirectoryRemote::new(dir.clone())))),
        RemoteBackend::Disabled => Ok(None),
    }
}
