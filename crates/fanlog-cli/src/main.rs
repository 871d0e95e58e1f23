//! fanlog CLI
//!
//! Thin wrapper around fanlog-core for emitting events and inspecting what
//! the sinks produced.
//!
//! ## Usage
//!
//! ```bash
//! # Emit one event through every configured sink
//! fanlog emit --level error --category system "Transaction failed" \
//!     --context transaction_id=12343_ff --context user_id=johndoe
//!
//! # Forward each stdin line as an event
//! tail -f app.out | fanlog pipe --level info --category app
//!
//! # Show the newest stored records
//! fanlog records --limit 20
//!
//! # List rotated log files
//! fanlog files
//!
//! # Print the effective configuration
//! fanlog config
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use fanlog_core::{
    ConsoleSink, Context, LogEvent, Logger, LoggingConfig, PickupDirTransport, RecordStore,
    RedbRecordStore, Severity,
};
use tokio::io::AsyncBufReadExt;

/// fanlog - structured log fan-out
#[derive(Parser)]
#[command(name = "fanlog")]
#[command(version = "0.1.0")]
#[command(about = "Structured log fan-out to console, files, a record store and email")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.fanlog/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable colors on console output
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit a single event
    Emit {
        /// Event message
        message: String,

        /// Severity name or number
        #[arg(short, long, default_value = "info")]
        level: String,

        /// Event category
        #[arg(long, default_value = "system")]
        category: String,

        /// Context pair, KEY=VALUE (VALUE parsed as JSON when possible)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Attach a caller stack as context.error.stack
        #[arg(long)]
        error_stack: Option<String>,
    },

    /// Emit one event per stdin line
    Pipe {
        #[arg(short, long, default_value = "info")]
        level: String,

        #[arg(long, default_value = "stdin")]
        category: String,
    },

    /// Show stored records, newest first
    Records {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List log files with their line counts
    Files,

    /// Print the effective configuration
    Config,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.fanlog/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fanlog")
        .join("data")
}

/// Load configuration: file (if given), then data-dir defaults, then env.
fn load_config(path: Option<&Path>, data_dir: &Path) -> Result<LoggingConfig> {
    let config = match path {
        Some(path) => LoggingConfig::from_file(path)?,
        None => LoggingConfig {
            file: fanlog_core::FileConfig {
                root_dir: data_dir.join("logs"),
                ..Default::default()
            },
            ..Default::default()
        },
    };
    Ok(config.with_env()?)
}

fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("logs.redb")
}

/// Parse a `KEY=VALUE` pair into the context map.
fn parse_context(pairs: &[String]) -> Result<Option<Context>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut context = Context::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid context '{}': expected KEY=VALUE", pair))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(Some(context))
}

fn parse_level(s: &str) -> Result<Severity> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Invalid level '{}': {}", s, e))
}

fn build_logger(config: LoggingConfig, data_dir: &Path, plain: bool) -> Result<Logger> {
    let store = RedbRecordStore::open(db_path(data_dir))
        .with_context(|| format!("opening record store in {}", data_dir.display()))?;
    let console = if plain {
        ConsoleSink::plain()
    } else {
        ConsoleSink::new()
    };

    Ok(Logger::builder(config)
        .record_store(Arc::new(store))
        .mail_transport(Arc::new(PickupDirTransport::new(data_dir.join("outbox"))))
        .console(console)
        .build()?)
}

fn print_outcome(event: &LogEvent) {
    let delivered: Vec<_> = event.delivered().iter().map(|s| s.as_str()).collect();
    println!(
        "Dispatched {} event to: {}",
        event.severity,
        if delivered.is_empty() {
            "(none)".to_string()
        } else {
            delivered.join(", ")
        }
    );
    for note in event.notes() {
        println!("  note: {}", note);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config = load_config(cli.config.as_deref(), &data_dir)?;

    match cli.command {
        Commands::Emit {
            message,
            level,
            category,
            context,
            error_stack,
        } => {
            let severity = parse_level(&level)?;
            let mut context = parse_context(&context)?;
            if let Some(stack) = error_stack {
                context.get_or_insert_with(Context::new).insert(
                    "error".to_string(),
                    serde_json::json!({ "stack": stack.replace("\\n", "\n") }),
                );
            }

            let logger = build_logger(config, &data_dir, cli.plain)?;
            let event = logger.log(severity, &category, message, context);
            logger.close_all().await?;

            match event {
                Some(event) => print_outcome(&event),
                None => println!("Event filtered out; nothing dispatched"),
            }
        }

        Commands::Pipe { level, category } => {
            let severity = parse_level(&level)?;
            let logger = build_logger(config, &data_dir, cli.plain)?;
            let source = logger.child(category);

            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            let mut count = 0usize;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                if source.log(severity, line, None).is_some() {
                    count += 1;
                }
            }
            logger.close_all().await?;
            println!("Dispatched {} events", count);
        }

        Commands::Records { limit } => {
            let store = RedbRecordStore::open(db_path(&data_dir))?;
            let records = store.recent(limit)?;

            if records.is_empty() {
                println!("No records stored.");
            } else {
                println!("Records ({}):", records.len());
                for record in records {
                    let level = record
                        .severity()
                        .map(|s| s.as_str().to_uppercase())
                        .unwrap_or_else(|_| record.level.to_string());
                    println!(
                        "  #{} {:<5} [{}] {} ({})",
                        record.id,
                        level,
                        record.category,
                        record.message,
                        record.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        Commands::Files => {
            let root = &config.file.root_dir;
            let mut files: Vec<PathBuf> = match std::fs::read_dir(root) {
                Ok(dir) => dir
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
                    .collect(),
                Err(_) => Vec::new(),
            };
            files.sort();

            if files.is_empty() {
                println!("No log files in {}", root.display());
            } else {
                println!("Log files in {}:", root.display());
                for path in files {
                    let lines = std::fs::read_to_string(&path)
                        .map(|content| content.lines().count())
                        .unwrap_or(0);
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    println!("  {} ({} lines)", name, lines);
                }
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
