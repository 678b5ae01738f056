//! Handler types and dependencies

use std::sync::Arc;

use teloxide::types::Message;

use crate::core::config::Settings;
use crate::session::SessionManager;
use crate::storage::FileStore;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub manager: Arc<SessionManager>,
    pub files: FileStore,
    pub settings: Arc<Settings>,
}

impl HandlerDeps {
    pub fn new(manager: Arc<SessionManager>, files: FileStore, settings: Arc<Settings>) -> Self {
        Self {
            manager,
            files,
            settings,
        }
    }

    /// True when the message was sent by a configured admin.
    pub fn is_admin(&self, msg: &Message) -> bool {
        sender_id(msg).is_some_and(|id| self.settings.is_admin(id))
    }
}

/// Telegram user id of the sender, if any.
pub(super) fn sender_id(msg: &Message) -> Option<u64> {
    msg.from.as_ref().map(|u| u.id.0)
}
