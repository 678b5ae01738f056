use thiserror::Error;

use crate::remote::RemoteError;
use crate::session::SessionError;

/// Centralized error types for the application
///
/// Component errors (session lifecycle, remote storage, Telegram) are converted
/// to this enum at module boundaries. Uses `thiserror` for automatic error
/// conversion and display formatting.
///
/// # Example
///
/// ```no_run
/// use telesync::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Session lifecycle errors (missing, invalidated, corrupt)
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Remote storage (Dropbox) errors
    #[error("Remote storage error: {0}")]
    Remote(#[from] RemoteError),

    /// Telegram Bot API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Telegram file download errors
    #[error("Telegram download error: {0}")]
    TelegramDownload(#[from] teloxide::DownloadError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Uploaded file exceeds the configured limit
    #[error("File too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    /// Requested file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Short machine-friendly category, used as a metrics label.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Session(_) => "session",
            AppError::Remote(_) => "remote",
            AppError::Telegram(_) | AppError::TelegramDownload(_) => "telegram",
            AppError::Io(_) => "io",
            AppError::TooLarge { .. } => "too_large",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
        }
    }
}
