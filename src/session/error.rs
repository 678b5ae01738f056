//! Session lifecycle errors

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors raised by the session store and manager
#[derive(Error, Debug)]
pub enum SessionError {
    /// No active session (never created, or already logged out)
    #[error("No active session")]
    NoSession,

    /// Session was invalidated and needs a fresh authentication
    #[error("Session invalidated: {0}")]
    Invalidated(String),

    /// Stored session failed validation (bad JSON, base64, checksum, version)
    #[error("Corrupt session data: {0}")]
    Corrupt(String),

    /// The credential blob is empty
    #[error("Session data is empty")]
    Empty,

    /// Local file errors
    #[error("Session file IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote sync errors
    #[error("Session sync failed: {0}")]
    Remote(#[from] RemoteError),
}

impl SessionError {
    /// True for errors that mean the stored credential cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SessionError::Corrupt(_))
    }
}
