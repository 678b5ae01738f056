//! Configuration values for the service.
//!
//! Everything is read once from the environment (after `.env` is loaded by
//! `main`) and cached. Components never read these statics directly; they
//! receive a [`Settings`] snapshot so tests can build their own.

use once_cell::sync::Lazy;
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: telesync.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "telesync.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_default()
});

/// Telegram API ID from my.telegram.org (needed for the MTProto client)
pub static TELEGRAM_API_ID: Lazy<Option<i32>> =
    Lazy::new(|| env::var("TELEGRAM_API_ID").ok().and_then(|v| v.trim().parse().ok()));

/// Telegram API hash from my.telegram.org
pub static TELEGRAM_API_HASH: Lazy<Option<String>> =
    Lazy::new(|| env::var("TELEGRAM_API_HASH").ok().filter(|v| !v.is_empty()));

/// Local session file path
/// Default: data/telegram.session.json
pub static SESSION_PATH: Lazy<String> =
    Lazy::new(|| env::var("SESSION_PATH").unwrap_or_else(|_| "data/telegram.session.json".to_string()));

/// Path of the session backup inside the remote store
/// Default: /telesync/telegram.session.json
pub static DROPBOX_SESSION_PATH: Lazy<String> = Lazy::new(|| {
    env::var("DROPBOX_SESSION_PATH").unwrap_or_else(|_| "/telesync/telegram.session.json".to_string())
});

/// Long-lived Dropbox access token (legacy apps)
pub static DROPBOX_ACCESS_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| env::var("DROPBOX_ACCESS_TOKEN").ok().filter(|v| !v.is_empty()));

/// Dropbox refresh token; takes priority over DROPBOX_ACCESS_TOKEN when set
/// together with DROPBOX_APP_KEY and DROPBOX_APP_SECRET
pub static DROPBOX_REFRESH_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| env::var("DROPBOX_REFRESH_TOKEN").ok().filter(|v| !v.is_empty()));

pub static DROPBOX_APP_KEY: Lazy<Option<String>> =
    Lazy::new(|| env::var("DROPBOX_APP_KEY").ok().filter(|v| !v.is_empty()));

pub static DROPBOX_APP_SECRET: Lazy<Option<String>> =
    Lazy::new(|| env::var("DROPBOX_APP_SECRET").ok().filter(|v| !v.is_empty()));

/// Directory used as the remote store when Dropbox is not configured
pub static REMOTE_DIR: Lazy<Option<String>> = Lazy::new(|| env::var("REMOTE_DIR").ok().filter(|v| !v.is_empty()));

/// Directory for files uploaded through HTTP or the bot
/// Default: uploads
pub static UPLOAD_DIR: Lazy<String> = Lazy::new(|| env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()));

/// Base URL used when replying with links to uploaded files
/// Default: http://localhost:{WEB_PORT}
pub static PUBLIC_BASE_URL: Lazy<String> = Lazy::new(|| {
    env::var("PUBLIC_BASE_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| format!("http://localhost:{}", *WEB_PORT))
});

/// HTTP port for the front door
/// Default: 3000
pub static WEB_PORT: Lazy<u16> =
    Lazy::new(|| env::var("WEB_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3000));

/// Comma-separated Telegram user IDs allowed to run admin commands
pub static ADMIN_IDS: Lazy<Vec<u64>> = Lazy::new(|| {
    env::var("ADMIN_IDS")
        .map(|v| parse_admin_ids(&v))
        .unwrap_or_default()
});

/// Bearer token required on the HTTP session endpoints (open when unset)
pub static ADMIN_TOKEN: Lazy<Option<String>> = Lazy::new(|| env::var("ADMIN_TOKEN").ok().filter(|v| !v.is_empty()));

/// Session sync configuration
pub mod sync {
    use super::*;

    /// Interval between background sync checks (in seconds)
    pub static INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
        env::var("SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(300)
    });

    /// Background sync interval duration
    pub fn interval() -> Duration {
        Duration::from_secs(*INTERVAL_SECS)
    }
}

/// Upload configuration
pub mod upload {
    use super::*;

    /// Maximum accepted upload size in bytes
    /// Default: 50 MiB (the Bot API download limit is 20 MiB, HTTP uploads may be larger)
    pub static MAX_BYTES: Lazy<u64> = Lazy::new(|| {
        env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50 * 1024 * 1024)
    });
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for remote storage calls (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Parses a comma/space separated list of numeric Telegram user IDs,
/// skipping anything that is not a number.
pub fn parse_admin_ids(raw: &str) -> Vec<u64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// How the service authenticates against Dropbox.
#[derive(Clone)]
pub enum DropboxAuth {
    /// Fixed access token
    AccessToken(SecretString),
    /// OAuth refresh token exchanged for short-lived access tokens
    RefreshToken {
        refresh_token: SecretString,
        app_key: String,
        app_secret: SecretString,
    },
}

impl std::fmt::Debug for DropboxAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropboxAuth::AccessToken(_) => f.write_str("AccessToken(..)"),
            DropboxAuth::RefreshToken { app_key, .. } => write!(f, "RefreshToken(app_key={})", app_key),
        }
    }
}

/// Which backend holds the remote session copy.
#[derive(Debug, Clone)]
pub enum RemoteBackend {
    Dropbox(DropboxAuth),
    Directory(PathBuf),
    /// No remote configured; sync operations are no-ops
    Disabled,
}

/// Snapshot of the configuration handed to components.
#[derive(Debug, Clone)]
pub struct Settings {
    pub session_path: PathBuf,
    pub remote_session_path: String,
    pub remote: RemoteBackend,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub web_port: u16,
    pub admin_ids: Vec<u64>,
    pub admin_token: Option<SecretString>,
    pub sync_interval: Duration,
    pub max_upload_bytes: u64,
    pub telegram_api_id: Option<i32>,
    pub telegram_api_hash: Option<String>,
}

impl Settings {
    /// Builds settings from the cached environment values.
    pub fn from_env() -> Self {
        Self {
            session_path: PathBuf::from(SESSION_PATH.as_str()),
            remote_session_path: DROPBOX_SESSION_PATH.clone(),
            remote: remote_backend_from_env(),
            upload_dir: PathBuf::from(UPLOAD_DIR.as_str()),
            public_base_url: PUBLIC_BASE_URL.clone(),
            web_port: *WEB_PORT,
            admin_ids: ADMIN_IDS.clone(),
            admin_token: ADMIN_TOKEN.clone().map(SecretString::from),
            sync_interval: sync::interval(),
            max_upload_bytes: *upload::MAX_BYTES,
            telegram_api_id: *TELEGRAM_API_ID,
            telegram_api_hash: TELEGRAM_API_HASH.clone(),
        }
    }

    /// Returns true if the Telegram user may run admin commands.
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn remote_backend_from_env() -> RemoteBackend {
    if let (Some(refresh), Some(key), Some(secret)) = (
        DROPBOX_REFRESH_TOKEN.as_ref(),
        DROPBOX_APP_KEY.as_ref(),
        DROPBOX_APP_SECRET.as_ref(),
    ) {
        return RemoteBackend::Dropbox(DropboxAuth::RefreshToken {
            refresh_token: SecretString::from(refresh.clone()),
            app_key: key.clone(),
            app_secret: SecretString::from(secret.clone()),
        });
    }
    if let Some(token) = DROPBOX_ACCESS_TOKEN.as_ref() {
        return RemoteBackend::Dropbox(DropboxAuth::AccessToken(SecretString::from(token.clone())));
    }
    if let Some(dir) = REMOTE_DIR.as_ref() {
        return RemoteBackend::Directory(PathBuf::from(dir));
    }
    RemoteBackend::Disabled
}
