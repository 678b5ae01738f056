//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use super::commands::{
    handle_files_command, handle_help_command, handle_logout_command, handle_start_command, handle_status_command,
    handle_sync_command,
};
use super::types::{sender_id, HandlerDeps, HandlerError};
use super::uploads::media_upload_handler;
use crate::core::metrics;
use crate::telegram::bot::Command;
use crate::telegram::Bot;

/// Creates the dispatcher schema for the Telegram bot.
///
/// The same schema is used in production and in integration tests.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_media_upload = deps;

    dptree::entry()
        .branch(command_handler(deps_commands))
        .branch(media_upload_handler(deps_media_upload))
}

/// Handler for the commands in [`Command`]
fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command {:?} from chat {}", cmd, msg.chat.id);
                metrics::BOT_COMMANDS_TOTAL.with_label_values(&[cmd.label()]).inc();

                if cmd.requires_admin() && !deps.is_admin(&msg) {
                    log::warn!("Refused /{} for non-admin {:?}", cmd.label(), sender_id(&msg));
                    bot.send_message(msg.chat.id, "This command is for admins only.").await?;
                    return Ok(());
                }

                let result = match cmd {
                    Command::Start => handle_start_command(&bot, &msg).await,
                    Command::Help => handle_help_command(&bot, &msg).await,
                    Command::Status => handle_status_command(&bot, &msg, &deps).await,
                    Command::Sync => handle_sync_command(&bot, &msg, &deps).await,
                    Command::Logout => handle_logout_command(&bot, &msg, &deps).await,
                    Command::Files => handle_files_command(&bot, &msg, &deps).await,
                };
                if let Err(e) = result {
                    log::error!("/{} handler failed for chat {}: {}", cmd.label(), msg.chat.id, e);
                }
                Ok::<(), HandlerError>(())
            }
        },
    ))
}
