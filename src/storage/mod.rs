//! On-disk storage for uploaded files

pub mod files;

pub use files::{public_url, sanitize_file_name, FileStore, StoredFile};
