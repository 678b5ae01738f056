//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup summary of the session/remote configuration (secrets are never logged)

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config::{DropboxAuth, RemoteBackend, Settings};

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to create the file or a logger is already set
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    let config = ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("grammers")
        .build();

    CombinedLogger::init(vec![
        TermLogger::new(LevelFilter::Info, config.clone(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Info, config, log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs which session and remote settings are in effect.
pub fn log_startup_configuration(settings: &Settings) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Session configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    log::info!("Local session file: {}", settings.session_path.display());
    match &settings.remote {
        RemoteBackend::Dropbox(DropboxAuth::RefreshToken { app_key, .. }) => {
            log::info!("Remote: Dropbox (refresh token, app key {})", app_key);
            log::info!("Remote session path: {}", settings.remote_session_path);
        }
        RemoteBackend::Dropbox(DropboxAuth::AccessToken(_)) => {
            log::info!("Remote: Dropbox (static access token)");
            log::info!("Remote session path: {}", settings.remote_session_path);
        }
        RemoteBackend::Directory(dir) => {
            log::info!("Remote: directory {}", dir.display());
        }
        RemoteBackend::Disabled => {
            log::warn!("Remote: not configured, the session will only live on this machine");
            log::warn!("Set DROPBOX_ACCESS_TOKEN or DROPBOX_REFRESH_TOKEN + DROPBOX_APP_KEY + DROPBOX_APP_SECRET");
        }
    }
    log::info!("Sync interval: {}s", settings.sync_interval.as_secs());
    log::info!("Upload dir: {}", settings.upload_dir.display());

    if settings.telegram_api_id.is_none() || settings.telegram_api_hash.is_none() {
        log::warn!("TELEGRAM_API_ID / TELEGRAM_API_HASH not set, MTProto client is disabled");
    }
    if settings.admin_ids.is_empty() {
        log::warn!("ADMIN_IDS is empty, admin bot commands are unavailable");
    }
    if settings.admin_token.is_none() {
        log::warn!("ADMIN_TOKEN not set, /session HTTP endpoints are unauthenticated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    #[test]
    fn test_init_logger_creates_log_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        // A second init in the same process fails; only the file creation is asserted.
        let _ = init_logger(path);
        assert!(temp_file.path().exists());
    }

    #[test]
    fn test_init_logger_rejects_bad_path() {
        assert!(init_logger("/nonexistent-dir/telesync/test.log").is_err());
    }
}
