use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub conn: Connection,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Live dashboard: running backup and history (default)
    Watch(Watch),
    /// Show the running backup job
    Status {
        /// Keep polling and print one line per tick with the live rate
        #[arg(long)]
        follow: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List finished backup jobs, newest first
    History {
        /// First day to include (YYYY-MM-DD, local time)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD, local time)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Ask the service to start an incremental backup
    Start,
}

#[derive(Args, Clone, Debug)]
pub struct Connection {
    /// Base URL of the backup service
    #[arg(long, global = true, env = "DDWATCH_HOST", default_value = "http://localhost:3000")]
    pub host: String,

    /// Request timeout in milliseconds
    #[arg(long, global = true, default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// Current job poll interval in milliseconds
    #[arg(long, global = true, default_value_t = 1_000, value_parser = clap::value_parser!(u64).range(50..))]
    pub status_interval_ms: u64,
}

impl Connection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

#[derive(Args, Clone, Debug)]
pub struct Watch {
    /// History poll interval in milliseconds
    #[arg(long, default_value_t = 2_500, value_parser = clap::value_parser!(u64).range(50..))]
    pub history_interval_ms: u64,
}

impl Default for Watch {
    fn default() -> Self {
        Self { history_interval_ms: 2_500 }
    }
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_service_poll_rates() {
        let cli = Cli::try_parse_from(["ddwatch", "watch"]).unwrap();
        assert_eq!(cli.conn.status_interval(), Duration::from_secs(1));
        match cli.command {
            Some(Commands::Watch(w)) => assert_eq!(w.history_interval_ms, 2_500),
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn history_parses_date_bounds() {
        let cli = Cli::try_parse_from([
            "ddwatch", "history", "--from", "2024-05-01", "--to", "2024-05-31", "--format", "json",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::History { from, to, format }) => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 5, 1));
                assert_eq!(to, NaiveDate::from_ymd_opt(2024, 5, 31));
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected history"),
        }
    }

    #[test]
    fn rejects_tiny_poll_interval() {
        assert!(Cli::try_parse_from(["ddwatch", "--status-interval-ms", "1", "status"]).is_err());
    }
}
