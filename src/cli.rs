//! Command line interface.
//!
//! [`Cli`] carries the subcommand ([`Command`]: run, check, table) and the
//! global flags (--config, --max-retries, --verbose).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// Weather station node: Wi-Fi, OTA check, MQTT, publish forever.
#[derive(Debug, Parser)]
#[command(name = "weather-node", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Overrides retry.max_retries from the configuration.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the node until an update is applied, retries run out, or Ctrl-C.
    Run {
        /// Stop after this many phase iterations.
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// Validate the configuration and transition table, then exit.
    Check,

    /// Print the transition table.
    Table,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["weather-node", "run", "--iterations", "12"]);
        match cli.command {
            Command::Run { iterations } => assert_eq!(iterations, Some(12)),
            _ => panic!("expected Run command"),
        }
        assert_eq!(cli.config, PathBuf::from("weather-node.toml"));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "weather-node",
            "--config",
            "/etc/weather-node.toml",
            "--max-retries",
            "5",
            "--verbose",
            "check",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.max_retries, Some(5));
        assert_eq!(cli.config, PathBuf::from("/etc/weather-node.toml"));
        assert!(matches!(cli.command, Command::Check));
    }

    #[test]
    fn cli_parses_table_subcommand() {
        let cli = Cli::parse_from(["weather-node", "table"]);
        assert!(matches!(cli.command, Command::Table));
        assert!(!cli.verbose);
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
