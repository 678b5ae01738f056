//! telesync - keeps a Telegram client session alive across machines
//!
//! The session credential is persisted locally, mirrored to Dropbox (or a
//! directory), and shared by a Telegram bot, an HTTP server and a background
//! sync task through a single locked owner.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, retry, HTTP server
//! - `session`: session model, local store, reconcile and the manager
//! - `remote`: remote storage backends (Dropbox, directory)
//! - `storage`: uploaded file storage
//! - `telegram`: bot commands and upload handling
//! - `mtproto`: grammers client bound to the managed session

pub mod cli;
pub mod core;
pub mod mtproto;
pub mod remote;
pub mod session;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use remote::RemoteStore;
pub use session::{SessionManager, SessionStatus, SyncAction, SyncOutcome};
pub use storage::FileStore;
