use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "telesync")]
#[command(author, version, about = "Telegram session keeper with Dropbox sync, bot commands and a file server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot, web server and background sync
    Run {
        /// Do not start the Telegram bot (web server and sync only)
        #[arg(long)]
        no_bot: bool,
    },

    /// Upload the local session, overwriting the remote copy
    Push,

    /// Replace the local session with the remote copy
    Pull,

    /// Print the session status as JSON
    Status {
        /// Reconcile with the remote before printing
        #[arg(long)]
        sync: bool,
    },

    /// Invalidate the session and delete the local and remote copies
    Logout {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["telesync", "run", "--no-bot"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { no_bot: true }));

        let cli = Cli::try_parse_from(["telesync", "status", "--sync"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Status { sync: true }));

        let cli = Cli::try_parse_from(["telesync", "logout", "-y"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Logout { yes: true }));

        let cli = Cli::try_parse_from(["telesync"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["telesync", "download"]).is_err());
    }
}
