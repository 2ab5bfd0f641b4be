//! Goaltracker CLI entry point
//!
//! Opens the store through a StateManager, dispatches one command, then
//! shuts the manager down so the database is closed cleanly.

use std::fs;
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use goaltracker::cli::{Cli, Command, OutputFormat};
use goaltracker::config::Config;
use goaltracker::{Outcome, Resolution, StateManager, Task, TaskId, UserId};

fn log_file() -> Result<fs::File> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("goaltracker")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
    fs::File::create(log_dir.join("goaltracker.log")).context("Failed to create log file")
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    match log_file() {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        Err(e) => {
            eprintln!("Warning: {:#}, logging to stderr", e);
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.storage.db_path.clone());
    info!(db_path = %db_path.display(), "goaltracker starting");

    let state = StateManager::spawn(&db_path, &config.store_options(), config.state.channel_capacity)
        .context(format!("Failed to open store at {}", db_path.display()))?;

    let result = dispatch(&state, cli.command).await;
    state.shutdown().await.context("Failed to close store")?;
    result
}

async fn dispatch(state: &StateManager, command: Command) -> Result<()> {
    debug!(?command, "main: dispatching command");
    match command {
        Command::Seen { user, name } => cmd_seen(state, user, name).await,
        Command::Add {
            user,
            description,
            date,
        } => cmd_add(state, user, description.join(" "), date.unwrap_or_else(today)).await,
        Command::Complete { task_id } => cmd_resolve(state, task_id, Outcome::Completed).await,
        Command::Fail { task_id } => cmd_resolve(state, task_id, Outcome::Failed).await,
        Command::Resolve { task_id, outcome } => {
            let resolution = state.resolve_task_str(task_id, &outcome).await?;
            print_resolution(&resolution);
            Ok(())
        }
        Command::Points { user } => cmd_points(state, user).await,
        Command::Tasks {
            user,
            date,
            all,
            format,
        } => cmd_tasks(state, user, date.unwrap_or_else(today), all, format).await,
        Command::User { user, format } => cmd_user(state, user, format).await,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn cmd_seen(state: &StateManager, user: String, name: String) -> Result<()> {
    debug!(%user, %name, "cmd_seen: called");
    state.upsert_user(user.as_str(), name.as_str()).await?;
    println!("{} Welcome {} ({})", "✓".green(), name.bold(), user.dimmed());
    Ok(())
}

async fn cmd_add(state: &StateManager, user: String, description: String, date: NaiveDate) -> Result<()> {
    debug!(%user, %date, "cmd_add: called");
    let task_id = state.create_task(&UserId::from(user), description.as_str(), date).await?;
    println!("{} Task {} added for {}: {}", "✓".green(), task_id.to_string().cyan(), date, description);
    Ok(())
}

async fn cmd_resolve(state: &StateManager, task_id: TaskId, outcome: Outcome) -> Result<()> {
    debug!(%task_id, %outcome, "cmd_resolve: called");
    let resolution = state.resolve_task(task_id, outcome).await?;
    print_resolution(&resolution);
    Ok(())
}

fn print_resolution(resolution: &Resolution) {
    let delta = resolution.effect.point_delta;
    let delta_text = if delta >= 0 {
        format!("+{} points", delta).green()
    } else {
        format!("{} points", delta).red()
    };
    println!(
        "Task {} {}: {} (total {}, streak {})",
        resolution.task.id.to_string().cyan(),
        resolution.task.state,
        delta_text,
        resolution.user.total_points,
        resolution.user.current_streak
    );
}

async fn cmd_points(state: &StateManager, user: String) -> Result<()> {
    debug!(%user, "cmd_points: called");
    let points = state.get_points(&UserId::from(user)).await?;
    println!("{}", points);
    Ok(())
}

async fn cmd_tasks(state: &StateManager, user: String, date: NaiveDate, all: bool, format: OutputFormat) -> Result<()> {
    debug!(%user, %date, all, ?format, "cmd_tasks: called");
    let user = UserId::from(user);
    let mut tasks: Vec<Task> = if all {
        state.list_tasks(&user, date).await?
    } else {
        state.list_pending_tasks(&user, date).await?
    };
    tasks.sort_by_key(|t| t.id);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tasks)?),
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks for {} on {}", user, date);
            }
            for task in tasks {
                println!("{:>4}  {:<9}  {}", task.id.to_string().cyan(), task.state.to_string(), task.description);
            }
        }
    }
    Ok(())
}

async fn cmd_user(state: &StateManager, user: String, format: OutputFormat) -> Result<()> {
    debug!(%user, ?format, "cmd_user: called");
    let user = state.get_user_required(&UserId::from(user)).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&user)?),
        OutputFormat::Text => {
            println!("User: {} ({})", user.display_name.bold(), user.id);
            println!("  Points: {}", user.total_points);
            println!("  Streak: {}", user.current_streak);
        }
    }
    Ok(())
}
