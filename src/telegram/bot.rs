//! Bot initialization
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation
//! - Command menu registration

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "introduction")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "session status")]
    Status,
    #[command(description = "sync the session with remote storage (admin)")]
    Sync,
    #[command(description = "log out and delete every session copy (admin)")]
    Logout,
    #[command(description = "list uploaded files")]
    Files,
}

impl Command {
    /// Label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Status => "status",
            Command::Sync => "sync",
            Command::Logout => "logout",
            Command::Files => "files",
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Command::Sync | Command::Logout)
    }
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Invalid BOT_API_URL or HTTP client setup failure
pub fn create_bot(token: &str) -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(token, client);

    let bot = if let Ok(bot_api_url) = std::env::var("BOT_API_URL") {
        log::info!("Using custom Bot API URL: {}", bot_api_url);
        let url = url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
        bot.set_api_url(url)
    } else {
        bot
    };

    Ok(bot)
}

/// Publishes the command list shown in the Telegram UI.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/status", "telesync_bot").unwrap(), Command::Status);
        assert_eq!(Command::parse("/sync@telesync_bot", "telesync_bot").unwrap(), Command::Sync);
        assert!(Command::parse("/unknown", "telesync_bot").is_err());
    }

    #[test]
    fn test_admin_commands() {
        assert!(Command::Sync.requires_admin());
        assert!(Command::Logout.requires_admin());
        assert!(!Command::Status.requires_admin());
        assert!(!Command::Files.requires_admin());
    }

    #[test]
    fn test_descriptions_list_every_command() {
        let help = Command::descriptions().to_string();
        for name in ["/start", "/help", "/status", "/sync", "/logout", "/files"] {
            assert!(help.contains(name), "{name} missing from help");
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_create_bot_honors_custom_api_url() {
        std::env::set_var("BOT_API_URL", "http://127.0.0.1:8081/");
        let bot = create_bot("123:abc").unwrap();
        std::env::remove_var("BOT_API_URL");
        assert_eq!(bot.api_url().as_str(), "http://127.0.0.1:8081/");
    }

    #[test]
    #[serial_test::serial]
    fn test_create_bot_rejects_invalid_api_url() {
        std::env::set_var("BOT_API_URL", "not a url");
        let result = create_bot("123:abc");
        std::env::remove_var("BOT_API_URL");
        assert!(result.is_err());
    }
}
