use clap::Parser;
use eventbook::config::BookingConfig;
use eventbook::domain::ports::StoreRef;
use eventbook::infrastructure::in_memory::InMemoryStore;
use eventbook::interfaces::csv::command_reader::CommandReader;
use eventbook::interfaces::replay::Replay;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = BookingConfig::from_env().into_diagnostic()?;
    let store = open_store(cli.db_path)?;
    let mut replay = Replay::new(store, config);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (line, record) in reader.commands().enumerate() {
        // Line 1 is the header.
        let line = line + 2;
        match record {
            Ok(record) => {
                let command = record.command;
                if let Err(e) = replay.apply(record).await {
                    eprintln!("Error processing command on line {line} ({command:?}): {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading command on line {line}: {e}");
            }
        }
    }

    let summary = replay.summary().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in summary {
        writeln!(out, "{row}").into_diagnostic()?;
    }
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreRef> {
    use eventbook::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}
