//! Documents and photos sent by admins are published on the file server

use bytes::Bytes;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, Message};

use super::types::{sender_id, HandlerDeps, HandlerError};
use crate::core::error::AppError;
use crate::core::metrics;
use crate::storage::public_url;
use crate::telegram::Bot;

/// What to fetch from Telegram for an incoming media message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct IncomingFile {
    pub file_id: FileId,
    pub file_name: String,
    pub size: u64,
}

/// Picks the attachment: the document, or the largest photo size.
pub(super) fn incoming_file(msg: &Message) -> Option<IncomingFile> {
    if let Some(doc) = msg.document() {
        return Some(IncomingFile {
            file_id: doc.file.id.clone(),
            file_name: doc.file_name.clone().unwrap_or_else(|| "document".to_string()),
            size: u64::from(doc.file.size),
        });
    }
    let photo = msg.photo()?.iter().max_by_key(|p| p.width * p.height)?;
    Some(IncomingFile {
        file_id: photo.file.id.clone(),
        file_name: format!("photo_{}.jpg", photo.file.unique_id.0),
        size: u64::from(photo.file.size),
    })
}

/// Answer to a non-admin upload. Groups stay quiet; only private chats get told.
pub(super) fn non_admin_reply(is_private: bool) -> Option<&'static str> {
    is_private.then_some("Only admins can upload files.")
}

/// Handler for media uploads (document/photo). Non-admins are refused in private chats.
pub(super) fn media_upload_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.document().is_some() || msg.photo().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if !deps.is_admin(&msg) {
                    log::info!("Ignoring upload from non-admin {:?} in chat {}", sender_id(&msg), msg.chat.id);
                    if let Some(text) = non_admin_reply(msg.chat.is_private()) {
                        bot.send_message(msg.chat.id, text).await?;
                    }
                    return Ok(());
                }
                let Some(incoming) = incoming_file(&msg) else {
                    return Ok(());
                };

                let reply = match store_incoming(&bot, &deps, &incoming).await {
                    Ok(url) => {
                        metrics::UPLOADS_TOTAL.with_label_values(&["telegram", "stored"]).inc();
                        url
                    }
                    Err(e) => {
                        metrics::UPLOADS_TOTAL.with_label_values(&["telegram", "rejected"]).inc();
                        log::warn!("Upload of {} failed: {}", incoming.file_name, e);
                        format!("Upload failed: {}", e)
                    }
                };
                bot.send_message(msg.chat.id, reply).await?;
                Ok::<(), HandlerError>(())
            }
        })
}

/// Downloads the attachment from Telegram, stores it and returns its public URL.
async fn store_incoming(bot: &Bot, deps: &HandlerDeps, incoming: &IncomingFile) -> Result<String, AppError> {
    // Reject before downloading anything.
    deps.files.check_size(incoming.size)?;

    let file = bot.get_file(incoming.file_id.clone()).await?;
    let mut buf: Vec<u8> = Vec::with_capacity(usize::try_from(file.size).unwrap_or(0));
    bot.download_file(&file.path, &mut buf).await?;

    let stored = deps.files.save(&incoming.file_name, Bytes::from(buf)).await?;
    log::info!("Stored Telegram upload {} as {}", incoming.file_name, stored.name);
    Ok(public_url(&deps.settings.public_base_url, &stored.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_admin_reply_only_in_private_chats() {
        assert_eq!(non_admin_reply(true), Some("Only admins can upload files."));
        assert_eq!(non_admin_reply(false), None);
    }
}
