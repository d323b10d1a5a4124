use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use plate_gate::storage::SqliteStore;
use plate_gate::GateConfig;

/// Manage the plates allowed through the gate and inspect the access log.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Database file, defaults to GATE_DB_PATH or alpr.db
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allow one or more plates
    Add {
        #[arg(required = true)]
        plates: Vec<String>,
    },
    /// Revoke a plate
    Remove { plate: String },
    /// Print every allowed plate
    List,
    /// Print the latest access events
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = match cli.db {
        Some(path) => path,
        None => GateConfig::from_env().context("reading GATE_* configuration")?.db_path,
    };
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    match cli.command {
        Command::Add { plates } => {
            for plate in plates {
                if store.insert(&plate)? {
                    println!("added {plate}");
                } else {
                    println!("{plate} already allowed");
                }
            }
        }
        Command::Remove { plate } => {
            if store.remove(&plate)? {
                println!("removed {plate}");
            } else {
                println!("{plate} was not allowed");
            }
        }
        Command::List => {
            for plate in store.list()? {
                println!("{plate}");
            }
        }
        Command::Log { limit } => {
            for event in store.recent(limit)? {
                println!(
                    "{}  {:<10}  conf={:.2}  {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.plate.as_deref().unwrap_or("-"),
                    event.confidence,
                    if event.allowed { "allowed" } else { "denied" }
                );
            }
        }
    }

    Ok(())
}
