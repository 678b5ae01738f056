//! MTProto client for direct Telegram API access via grammers
//!
//! The client's auth key lives in the managed session, so signing in on one
//! machine makes the key available to every replica after the next sync.

pub mod client;
pub mod error;

pub use client::MtProtoClient;
pub use error::MtProtoError;
