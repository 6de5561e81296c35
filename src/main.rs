use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use stayline::application::engine::{Collaborators, ReservationEngine};
use stayline::config::EngineConfig;
use stayline::domain::ports::{PaymentAttemptStoreRef, ReservationStoreRef};
use stayline::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryPaymentAttemptStore, InMemoryReservationStore,
};
use stayline::infrastructure::sandbox::{LogNotifier, SandboxProcessor};
use stayline::interfaces::csv::command_reader::CommandReader;
use stayline::interfaces::csv::outcome_writer::OutcomeWriter;
use stayline::interfaces::csv::script_runner::ScriptRunner;
use stayline::telemetry::init_logging;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Replays a booking command script against the reservation engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON array of listing snapshots
    catalog: PathBuf,

    /// Command script CSV file
    commands: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Tax rate applied to base and option prices, e.g. 0.07
    #[arg(long)]
    tax_rate: Option<Decimal>,

    /// Bound on each payment processor call, in milliseconds
    #[arg(long)]
    processor_timeout_ms: Option<u64>,
}

type Stores = (ReservationStoreRef, PaymentAttemptStoreRef);

fn in_memory() -> Stores {
    (
        Arc::new(InMemoryReservationStore::new()),
        Arc::new(InMemoryPaymentAttemptStore::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn storage(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        Some(db_path) => {
            let store = stayline::infrastructure::rocksdb::RocksDBStore::open(db_path)
                .into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn storage(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("warn");

    let mut config = EngineConfig::from_env();
    if let Some(tax_rate) = cli.tax_rate {
        config = config.with_tax_rate(tax_rate).into_diagnostic()?;
    }
    if let Some(ms) = cli.processor_timeout_ms {
        config = config.with_processor_timeout(Duration::from_millis(ms));
    }

    let catalog = InMemoryCatalog::from_json_reader(File::open(&cli.catalog).into_diagnostic()?)
        .into_diagnostic()?;
    let (reservations, attempts) = storage(cli.db_path)?;
    let sandbox = SandboxProcessor::new();

    let engine = ReservationEngine::new(
        &config,
        Collaborators {
            catalog: Arc::new(catalog),
            reservations,
            attempts,
            processor: Arc::new(sandbox.clone()),
            notifier: Arc::new(LogNotifier),
        },
    );
    let mut runner = ScriptRunner::new(engine, sandbox);

    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());

    let file = File::open(cli.commands).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for record in reader.commands() {
        match record {
            Ok(record) => {
                let outcome = runner.run(record).await;
                writer.write(&outcome).into_diagnostic()?;
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }
    writer.flush().into_diagnostic()?;

    Ok(())
}
