//! CLI subcommand definitions.
//!
//! Uses clap derive:
//! - `start` (default) -- run the bot
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};

/// Gatehouse group-join verification bot.
#[derive(Parser, Debug)]
#[command(
    name = "gatehouse",
    version = env!("CARGO_PKG_VERSION"),
    about = "Gatehouse: captcha verification and spam screening for Telegram groups"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bot (default when no subcommand is given).
    Start,

    /// Print version information.
    Version,
}

pub fn handle_version() {
    println!("gatehouse v{}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_no_subcommand() {
        let cli = Cli::parse_from(["gatehouse"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parses_start() {
        let cli = Cli::parse_from(["gatehouse", "start"]);
        assert!(matches!(cli.command, Some(Command::Start)));
    }

    #[test]
    fn test_cli_parses_version() {
        let cli = Cli::parse_from(["gatehouse", "version"]);
        assert!(matches!(cli.command, Some(Command::Version)));
    }
}
