//! MTProto-specific error types

use thiserror::Error;

use crate::session::SessionError;

/// Errors that can occur while bringing up the MTProto client
#[derive(Error, Debug)]
pub enum MtProtoError {
    /// TELEGRAM_API_ID / TELEGRAM_API_HASH not configured
    #[error("MTProto credentials are not configured (TELEGRAM_API_ID, TELEGRAM_API_HASH)")]
    MissingCredentials,

    /// The stored blob is not a session grammers can load
    #[error("Unreadable session data: {0}")]
    SessionData(String),

    /// Connecting to a Telegram datacenter failed
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// Grammers client invocation error
    #[error("MTProto client error: {0}")]
    Invocation(#[from] grammers_mtsender::InvocationError),

    /// Sign-in failed
    #[error("Sign-in failed: {0}")]
    SignIn(String),

    /// Storing the refreshed session failed
    #[error("Session store error: {0}")]
    Store(#[from] SessionError),
}

impl MtProtoError {
    /// True when Telegram no longer recognizes the session's auth key.
    pub fn is_auth_key_revoked(&self) -> bool {
        match self {
            MtProtoError::Invocation(grammers_mtsender::InvocationError::Rpc(rpc)) => {
                matches!(rpc.name.as_str(), "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED" | "USER_DEACTIVATED")
            }
            _ => false,
        }
    }
}
