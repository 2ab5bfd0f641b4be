//! CLI command definitions and subcommands
//!
//! Each subcommand stands in for one inbound event from a messaging
//! platform, or is a read-only query.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::TaskId;

/// Goaltracker - daily tasks, points and streaks
#[derive(Parser, Debug)]
#[command(name = "gt")]
#[command(author, version, about = "Track daily goals with points and streaks", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Database file (overrides storage.db-path)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a user or refresh their display name
    Seen {
        /// Platform user id
        #[arg(required = true)]
        user: String,

        /// Display name
        #[arg(required = true)]
        name: String,
    },

    /// Add a task for a user
    Add {
        /// Platform user id
        #[arg(required = true)]
        user: String,

        /// Task description
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,

        /// Assigned date, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Mark a task completed (+100 points)
    Complete {
        #[arg(required = true)]
        task_id: TaskId,
    },

    /// Mark a task failed (-110 points, streak reset)
    Fail {
        #[arg(required = true)]
        task_id: TaskId,
    },

    /// Resolve a task with an outcome given as text (complete or fail)
    Resolve {
        #[arg(required = true)]
        task_id: TaskId,

        #[arg(required = true)]
        outcome: String,
    },

    /// Show a user's total points
    Points {
        #[arg(required = true)]
        user: String,
    },

    /// List a user's pending tasks for a day
    Tasks {
        #[arg(required = true)]
        user: String,

        /// Day to list, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Include completed and failed tasks
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a user's points and streak
    User {
        #[arg(required = true)]
        user: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add_joins_description() {
        let cli = Cli::try_parse_from(["gt", "add", "alice", "go", "for", "a", "run", "--date", "2024-01-01"]).unwrap();
        match cli.command {
            Command::Add { user, description, date } => {
                assert_eq!(user, "alice");
                assert_eq!(description.join(" "), "go for a run");
                assert_eq!(date, Some("2024-01-01".parse().unwrap()));
            }
            other => panic!("Expected Add, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_with_date_first() {
        let cli = Cli::try_parse_from(["gt", "add", "--date", "2024-01-01", "alice", "read"]).unwrap();
        match cli.command {
            Command::Add { user, description, date } => {
                assert_eq!(user, "alice");
                assert_eq!(description, vec!["read".to_string()]);
                assert_eq!(date, Some("2024-01-01".parse().unwrap()));
            }
            other => panic!("Expected Add, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_complete_requires_numeric_id() {
        assert!(Cli::try_parse_from(["gt", "complete", "12"]).is_ok());
        assert!(Cli::try_parse_from(["gt", "complete", "twelve"]).is_err());
    }

    #[test]
    fn test_parse_global_db_flag() {
        let cli = Cli::try_parse_from(["gt", "points", "alice", "--db", "/tmp/x.db"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
