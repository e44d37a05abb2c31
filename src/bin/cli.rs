//! pagelog CLI
//!
//! Offline inspection of a write-ahead log directory.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use pagelog::wal::{detect_format, discover_segments, WalReader};
use pagelog::{
    DiskWriteAheadLog, LogSequenceNumber, PageOperation, WalConfig, WalRecord, WalRecovery,
};
use tracing_subscriber::{fmt, EnvFilter};

/// pagelog CLI
#[derive(Parser, Debug)]
#[command(name = "pagelog-cli")]
#[command(about = "Inspect and verify pagelog write-ahead logs")]
#[command(version)]
struct Args {
    /// WAL directory
    #[arg(short, long, default_value = "./pagelog_data")]
    dir: PathBuf,

    /// Storage name (prefix of the WAL files)
    #[arg(short, long, default_value = "storage")]
    storage: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List segment files with their format and size
    Segments,

    /// Print every record in LSN order
    Dump {
        /// Start at this segment instead of the first record
        #[arg(long)]
        from_segment: Option<u64>,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the last checkpoint stored in the master record
    Checkpoint,

    /// Scan the whole log and classify atomic operations
    Verify,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pagelog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> pagelog::Result<()> {
    match &args.command {
        Commands::Segments => list_segments(args),
        Commands::Dump {
            from_segment,
            limit,
        } => {
            let wal = open_log(args)?;
            dump(&wal, *from_segment, *limit)?;
            wal.close(false)
        }
        Commands::Checkpoint => {
            let wal = open_log(args)?;
            match wal.last_checkpoint() {
                Some(lsn) => println!("last checkpoint: {}", lsn),
                None => println!("no checkpoint recorded"),
            }
            wal.close(false)
        }
        Commands::Verify => {
            let wal = open_log(args)?;
            let result = WalRecovery::verify(&wal)?;
            println!("records scanned:        {}", result.records_scanned);
            println!("start:                  {}", describe(result.start_lsn));
            println!("last:                   {}", describe(result.last_lsn));
            println!("operations committed:   {}", result.operations_committed);
            println!("operations rolled back: {}", result.operations_rolled_back);
            println!("operations incomplete:  {}", result.operations_incomplete);
            wal.close(false)
        }
    }
}

fn open_log(args: &Args) -> pagelog::Result<DiskWriteAheadLog> {
    let config = WalConfig::builder()
        .wal_dir(&args.dir)
        .storage_name(&args.storage)
        .build();
    DiskWriteAheadLog::open(config)
}

/// Segment listing reads the directory only, without opening (and repairing) the log
fn list_segments(args: &Args) -> pagelog::Result<()> {
    for file in discover_segments(&args.dir, &args.storage, true)? {
        let format = detect_format(&file.path)?;
        let size = std::fs::metadata(&file.path)?.len();
        println!(
            "{:>8}  {:?}  {:>12} bytes  {}",
            file.order,
            format,
            size,
            file.path.display()
        );
    }
    Ok(())
}

fn dump(wal: &DiskWriteAheadLog, from_segment: Option<u64>, limit: Option<usize>) -> pagelog::Result<()> {
    let reader = match from_segment {
        Some(segment) => WalReader::new(wal, LogSequenceNumber::new(segment, 0)),
        None => WalReader::from_begin(wal)?,
    };

    for item in reader.take(limit.unwrap_or(usize::MAX)) {
        let (lsn, record) = item?;
        println!("{}  {}", lsn, summarize(&record));
    }
    Ok(())
}

fn summarize(record: &WalRecord) -> String {
    match record {
        WalRecord::AtomicUnitStart {
            operation_id,
            rollback_supported,
        } => format!("{} {} rollback_supported={}", record.name(), operation_id, rollback_supported),
        WalRecord::AtomicUnitEnd {
            operation_id,
            rollback,
            metadata,
            ..
        } => format!(
            "{} {} rollback={} metadata={}",
            record.name(),
            operation_id,
            rollback,
            metadata.len()
        ),
        WalRecord::PageOperation(operation) => format!(
            "{} {} {} kind={} initial={}",
            record.name(),
            operation.operation_id,
            operation.page,
            operation.operation.kind(),
            operation.initial_lsn
        ),
        WalRecord::FullCheckpointStart { previous_checkpoint }
        | WalRecord::FuzzyCheckpointStart {
            previous_checkpoint,
            ..
        } => format!("{} previous={}", record.name(), describe(*previous_checkpoint)),
        _ => record.name().to_string(),
    }
}

fn describe(lsn: Option<LogSequenceNumber>) -> String {
    lsn.map_or_else(|| "-".to_string(), |lsn| lsn.to_string())
}
