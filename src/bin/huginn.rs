//! huginn: resolve requests and review the response cache from a shell.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use huginn::cache::editor::DEFAULT_PURGE_AGE;
use huginn::cache::{CacheEditor, CacheStore};
use huginn::config::Config;
use huginn::{CacheKey, EntryState, OperationKind, Request, ResolveOptions, Scalar};
use serde::Serialize;

/// Huginn CLI
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version)]
#[command(about = "Failover routing and reviewed response caching for AI providers")]
struct Args {
    /// Config file (default: ~/.huginn/config.toml, then /etc/huginn/config.toml)
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a request through the cache and the configured credentials
    Resolve {
        /// Operation kind (complete, vision, image_generation)
        operation: OperationKind,
        /// Prompt text
        text: String,
        /// Request parameter as name=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Scalar)>,
        /// Overall deadline in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Serve pending cache entries too
        #[arg(long)]
        trust_pending: bool,
    },

    /// Review and maintain the response cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List entries, newest first
    List {
        /// Only entries in this state
        #[arg(long)]
        state: Option<EntryState>,
    },
    /// Show one entry
    Show { key: String },
    /// Approve a pending entry
    Accept { key: String },
    /// Reject a pending entry or revoke an accepted one
    Reject { key: String },
    /// Replace a pending entry's text and approve it
    Edit { key: String, text: String },
    /// Delete one entry
    Delete { key: String },
    /// Delete every entry
    Clear,
    /// Save all entries under a name
    Snapshot { name: String },
    /// Replace the cache with a named snapshot
    Restore { name: String },
    /// List snapshots, newest first
    Snapshots,
    /// Entry counts and hit totals
    Stats,
    /// Delete entries idle for longer than the given number of days
    Purge {
        #[arg(long)]
        days: Option<u64>,
    },
}

fn parse_param(raw: &str) -> Result<(String, Scalar), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value = if let Ok(b) = value.parse::<bool>() {
        Scalar::Bool(b)
    } else if let Ok(i) = value.parse::<i64>() {
        Scalar::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        Scalar::Float(f)
    } else {
        Scalar::Text(value.to_string())
    };
    Ok((name.trim().to_string(), value))
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: huginn=info; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huginn=info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Resolve {
            operation,
            text,
            params,
            deadline_secs,
            trust_pending,
        } => {
            let config = Config::load(args.config.as_deref())?;
            let router = config.build_router()?;

            let request = params
                .into_iter()
                .fold(Request::text(operation, text), |request, (name, value)| {
                    request.param(name, value)
                });
            let mut options = ResolveOptions::new();
            if let Some(secs) = deadline_secs {
                options = options.deadline(Duration::from_secs(secs));
            }
            if trust_pending {
                options = options.trust_pending(true);
            }

            match router.resolve_with(&request, options).await {
                Ok(resolution) => print_json(&resolution)?,
                Err(e) => {
                    if !e.failures().is_empty() {
                        eprintln!("{}", serde_json::to_string_pretty(e.failures())?);
                    }
                    return Err(e.into());
                }
            }
        }

        Command::Cache(command) => {
            // Cache maintenance works without a config file.
            let config = Config::load_or_default(args.config.as_deref())?;
            let store = Arc::new(CacheStore::open_dir(config.cache_dir()?)?);
            run_cache_command(CacheEditor::new(store), command)?;
        }
    }

    Ok(())
}

fn run_cache_command(
    editor: CacheEditor,
    command: CacheCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        CacheCommand::List { state } => print_json(&editor.list_entries(state))?,
        CacheCommand::Show { key } => match editor.show(&CacheKey::new(key.clone())) {
            Some(entry) => print_json(&entry)?,
            None => return Err(huginn::HuginnError::EntryNotFound(CacheKey::new(key)).into()),
        },
        CacheCommand::Accept { key } => print_json(&editor.accept(&CacheKey::new(key))?)?,
        CacheCommand::Reject { key } => print_json(&editor.reject(&CacheKey::new(key))?)?,
        CacheCommand::Edit { key, text } => {
            print_json(&editor.edit(&CacheKey::new(key), text)?)?
        }
        CacheCommand::Delete { key } => print_json(&editor.delete(&CacheKey::new(key))?)?,
        CacheCommand::Clear => {
            print_json(&serde_json::json!({ "removed": editor.clear_all()? }))?
        }
        CacheCommand::Snapshot { name } => print_json(&editor.snapshot(&name)?)?,
        CacheCommand::Restore { name } => print_json(&editor.restore(&name)?)?,
        CacheCommand::Snapshots => print_json(&editor.snapshots()?)?,
        CacheCommand::Stats => print_json(&editor.stats())?,
        CacheCommand::Purge { days } => {
            let max_age = days
                .map(|d| Duration::from_secs(d.saturating_mul(24 * 60 * 60)))
                .unwrap_or(DEFAULT_PURGE_AGE);
            print_json(&serde_json::json!({ "removed": editor.purge_idle(max_age)? }))?
        }
    }
    Ok(())
}
