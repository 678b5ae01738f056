//! Telegram client session lifecycle
//!
//! - `model`: the session value and its on-disk/remote envelope
//! - `store`: atomic local persistence
//! - `reconcile`: picks the sync direction
//! - `manager`: the locked owner of the session, performs push/pull
//! - `scheduler`: periodic background sync

pub mod error;
pub mod manager;
pub mod model;
pub mod reconcile;
pub mod scheduler;
pub mod store;

pub use error::SessionError;
pub use manager::{SessionLease, SessionManager, SessionState, SessionStatus, SyncOutcome};
pub use model::{Session, SessionEnvelope};
pub use reconcile::{reconcile, RemoteSnapshot, SyncAction};
pub use scheduler::start_sync_scheduler;
pub use store::LocalSessionStore;
