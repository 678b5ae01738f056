//! Command handler implementations (/start, /help, /status, /sync, /logout, /files)

use teloxide::prelude::*;
use teloxide::types::Message;
use teloxide::utils::command::BotCommands;

use super::types::{HandlerDeps, HandlerError};
use crate::session::{SessionStatus, SyncAction, SyncOutcome};
use crate::storage::{public_url, StoredFile};
use crate::telegram::bot::Command;
use crate::telegram::Bot;

/// Most files listed by /files
const FILES_LIST_LIMIT: usize = 20;

pub(super) async fn handle_start_command(bot: &Bot, msg: &Message) -> Result<(), HandlerError> {
    let text = format!(
        "telesync keeps this service's Telegram session backed up and in sync.\n\
         Admins can send a document or photo to publish it on the file server.\n\n{}",
        Command::descriptions()
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(super) async fn handle_help_command(bot: &Bot, msg: &Message) -> Result<(), HandlerError> {
    bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
    Ok(())
}

pub(super) async fn handle_status_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let status = deps.manager.status().await;
    bot.send_message(msg.chat.id, format_status(&status)).await?;
    Ok(())
}

pub(super) async fn handle_sync_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let text = match deps.manager.sync().await {
        Ok(outcome) => format_sync_outcome(&outcome),
        Err(e) => {
            log::warn!("Sync requested from chat {} failed: {}", msg.chat.id, e);
            format!("Sync failed: {}", e)
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(super) async fn handle_logout_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let text = match deps.manager.logout().await {
        Ok(()) => "Logged out. Local and remote session copies were deleted.".to_string(),
        Err(e) => {
            log::error!("Logout requested from chat {} failed: {}", msg.chat.id, e);
            format!("Logout failed: {}", e)
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(super) async fn handle_files_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let text = match deps.files.list().await {
        Ok(files) => format_file_list(&files, &deps.settings.public_base_url),
        Err(e) => {
            log::error!("Failed to list uploads: {}", e);
            "Could not list files right now.".to_string()
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(super) fn format_status(status: &SessionStatus) -> String {
    let mut lines = vec![format!("Session: {}", status.state)];
    if let Some(reason) = &status.invalidated_reason {
        lines.push(format!("Reason: {}", reason));
    }
    if let Some(checksum) = &status.checksum {
        lines.push(format!("Checksum: {}", checksum));
    }
    if let Some(updated) = status.updated_at {
        lines.push(format!("Updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    match status.last_synced_at {
        Some(synced) => lines.push(format!("Last sync: {}", synced.format("%Y-%m-%d %H:%M:%S UTC"))),
        None if status.state == "active" => lines.push("Last sync: never".to_string()),
        None => {}
    }
    if status.dirty {
        lines.push("Unsynced local changes".to_string());
    }
    lines.push(format!("Remote: {}", status.remote.as_deref().unwrap_or("not configured")));
    if let Some(err) = &status.last_sync_error {
        lines.push(format!("Last sync error: {}", err));
    }
    lines.join("\n")
}

pub(super) fn format_sync_outcome(outcome: &SyncOutcome) -> String {
    match outcome.action {
        SyncAction::Nothing => "Nothing to sync: no session here or remotely.".to_string(),
        SyncAction::InSync => "Already in sync.".to_string(),
        SyncAction::Push => format!("Uploaded the local session (rev {}).", outcome.rev.as_deref().unwrap_or("?")),
        SyncAction::Pull => format!("Downloaded the remote session (rev {}).", outcome.rev.as_deref().unwrap_or("?")),
    }
}

pub(super) fn format_file_list(files: &[StoredFile], base_url: &str) -> String {
    if files.is_empty() {
        return "No files uploaded yet.".to_string();
    }
    let mut lines: Vec<String> = files
        .iter()
        .take(FILES_LIST_LIMIT)
        .map(|f| format!("{} ({} bytes)\n{}", f.name, f.size, public_url(base_url, &f.name)))
        .collect();
    if files.len() > FILES_LIST_LIMIT {
        lines.push(format!("...and {} more", files.len() - FILES_LIST_LIMIT));
    }
    lines.join("\n\n")
}
