//! Telegram bot handler tree configuration
//!
//! The handlers are organized so integration tests can use the same
//! handler tree as production code.

mod commands;
mod schema;
mod types;
mod uploads;

pub use schema::schema;
pub use types::{HandlerDeps, HandlerError};
