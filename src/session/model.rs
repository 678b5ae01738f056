//! Session data model and its on-disk/remote envelope format

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::SessionError;

/// Current envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// SHA-256 of the credential blob, hex encoded
pub fn checksum(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

/// A serialized Telegram client authentication session.
///
/// The blob is opaque to this crate; only the MTProto client understands it.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    blob: Vec<u8>,
    checksum: String,
    /// When the blob last changed locally
    pub updated_at: DateTime<Utc>,
    /// When the session was last pushed to or pulled from the remote
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Remote revision recorded at the last sync
    pub remote_rev: Option<String>,
    /// Checksum of the blob as of the last sync
    synced_checksum: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("len", &self.blob.len())
            .field("checksum", &self.short_checksum())
            .field("updated_at", &self.updated_at)
            .field("last_synced_at", &self.last_synced_at)
            .field("remote_rev", &self.remote_rev)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl Session {
    /// Creates a fresh, never-synced session.
    pub fn new(blob: Vec<u8>) -> Result<Self, SessionError> {
        Self::with_timestamp(blob, Utc::now())
    }

    pub(crate) fn with_timestamp(blob: Vec<u8>, updated_at: DateTime<Utc>) -> Result<Self, SessionError> {
        if blob.is_empty() {
            return Err(SessionError::Empty);
        }
        Ok(Self {
            checksum: checksum(&blob),
            blob,
            updated_at,
            last_synced_at: None,
            remote_rev: None,
            synced_checksum: None,
        })
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// First 12 hex chars of the checksum, for logs and status output.
    pub fn short_checksum(&self) -> &str {
        &self.checksum[..12.min(self.checksum.len())]
    }

    /// Replaces the blob after a refresh.
    ///
    /// Returns `Ok(false)` without touching `updated_at` when the content is
    /// unchanged, so an idempotent re-save does not mark the session dirty.
    pub fn refresh(&mut self, blob: Vec<u8>) -> Result<bool, SessionError> {
        if blob.is_empty() {
            return Err(SessionError::Empty);
        }
        let new_checksum = checksum(&blob);
        if new_checksum == self.checksum {
            return Ok(false);
        }
        self.blob = blob;
        self.checksum = new_checksum;
        self.updated_at = Utc::now().max(self.updated_at);
        Ok(true)
    }

    /// Records a successful push or pull of the current blob.
    pub fn mark_synced(&mut self, rev: Option<String>, at: DateTime<Utc>) {
        self.remote_rev = rev;
        self.last_synced_at = Some(at);
        self.synced_checksum = Some(self.checksum.clone());
    }

    /// True when the blob differs from the one last pushed or pulled.
    pub fn is_dirty(&self) -> bool {
        self.synced_checksum.as_deref() != Some(self.checksum.as_str())
    }

    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        SessionEnvelope::from(self).encode()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        SessionEnvelope::decode(bytes)?.into_session()
    }
}

/// JSON document stored locally and remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub version: u32,
    /// Base64 (standard alphabet, padded) credential blob
    pub data: String,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_checksum: Option<String>,
}

impl From<&Session> for SessionEnvelope {
    fn from(session: &Session) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            data: BASE64.encode(&session.blob),
            checksum: session.checksum.clone(),
            updated_at: session.updated_at,
            last_synced_at: session.last_synced_at,
            remote_rev: session.remote_rev.clone(),
            synced_checksum: session.synced_checksum.clone(),
        }
    }
}

impl SessionEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec_pretty(self).map_err(|e| SessionError::Corrupt(format!("encode failed: {}", e)))
    }

    /// Parses the JSON envelope without validating the payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Corrupt(format!("invalid envelope: {}", e)))
    }

    /// Validates version, base64 and checksum, and builds the session.
    pub fn into_session(self) -> Result<Session, SessionError> {
        if self.version != ENVELOPE_VERSION {
            return Err(SessionError::Corrupt(format!(
                "unsupported envelope version {}",
                self.version
            )));
        }
        let blob = BASE64
            .decode(self.data.trim())
            .map_err(|e| SessionError::Corrupt(format!("invalid base64 payload: {}", e)))?;
        if blob.is_empty() {
            return Err(SessionError::Corrupt("empty payload".to_string()));
        }
        let actual = checksum(&blob);
        if !actual.eq_ignore_ascii_case(self.checksum.trim()) {
            return Err(SessionError::Corrupt(format!(
                "checksum mismatch (expected {}, got {})",
                self.checksum, actual
            )));
        }
        // Files written before `synced_checksum` existed: clean if synced after the last change.
        let synced_checksum = self.synced_checksum.or_else(|| {
            self.last_synced_at
                .filter(|synced| *synced >= self.updated_at)
                .map(|_| actual.clone())
        });
        Ok(Session {
            blob,
            checksum: actual,
            updated_at: self.updated_at,
            last_synced_at: self.last_synced_at,
            remote_rev: self.remote_rev,
            synced_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_session_is_dirty() {
        let session = Session::new(b"auth-key".to_vec()).unwrap();
        assert!(session.is_dirty());
        assert_eq!(session.checksum(), checksum(b"auth-key"));
        assert_eq!(session.short_checksum().len(), 12);
    }

    #[test]
    fn test_empty_blob_rejected() {
        assert!(matches!(Session::new(Vec::new()), Err(SessionError::Empty)));
    }

    #[test]
    fn test_refresh_same_content_is_noop() {
        let mut session = Session::new(b"a".to_vec()).unwrap();
        session.mark_synced(Some("rev1".into()), Utc::now());
        assert!(!session.is_dirty());

        assert!(!session.refresh(b"a".to_vec()).unwrap());
        assert!(!session.is_dirty());

        assert!(session.refresh(b"b".to_vec()).unwrap());
        assert_eq!(session.blob(), b"b");
    }

    #[test]
    fn test_mark_synced_with_older_clock_is_clean() {
        let mut session = Session::new(b"a".to_vec()).unwrap();
        session.mark_synced(None, session.updated_at - Duration::seconds(30));
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_refresh_after_future_stamped_pull_is_dirty() {
        // Copy written by a replica whose clock runs ten minutes ahead.
        let ahead = Utc::now() + Duration::minutes(10);
        let mut session = Session::with_timestamp(b"from-fast-replica".to_vec(), ahead).unwrap();
        session.mark_synced(Some("r1".into()), ahead);
        assert!(!session.is_dirty());

        assert!(session.refresh(b"new-auth-key".to_vec()).unwrap());
        assert!(session.is_dirty());

        // Changing back to the synced blob is clean again.
        assert!(session.refresh(b"from-fast-replica".to_vec()).unwrap());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_legacy_envelope_without_synced_checksum() {
        let mut session = Session::new(b"old-format".to_vec()).unwrap();
        session.mark_synced(Some("r1".into()), Utc::now());
        let mut envelope = SessionEnvelope::from(&session);
        envelope.synced_checksum = None;
        assert!(!envelope.clone().into_session().unwrap().is_dirty());

        envelope.last_synced_at = Some(envelope.updated_at - Duration::seconds(5));
        assert!(envelope.into_session().unwrap().is_dirty());
    }

    #[test]
    fn test_envelope_roundtrip_keeps_sync_state() {
        let mut session = Session::new(vec![0, 1, 2, 255]).unwrap();
        session.mark_synced(Some("015f".into()), Utc::now());

        let decoded = Session::decode(&session.encode().unwrap()).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_decode_rejects_checksum_mismatch() {
        let session = Session::new(b"secret".to_vec()).unwrap();
        let mut envelope = SessionEnvelope::from(&session);
        envelope.checksum = checksum(b"other");

        let err = envelope.into_session().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_decode_rejects_bad_base64_and_version() {
        let session = Session::new(b"secret".to_vec()).unwrap();

        let mut bad_data = SessionEnvelope::from(&session);
        bad_data.data = "%%%".to_string();
        assert!(bad_data.into_session().unwrap_err().is_corruption());

        let mut bad_version = SessionEnvelope::from(&session);
        bad_version.version = 9;
        assert!(bad_version.into_session().unwrap_err().is_corruption());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Session::decode(b"not json").unwrap_err().is_corruption());
    }
}
