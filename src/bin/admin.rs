//! Keystone Admin Tool
//!
//! Inspects and maintains a Keystone data directory.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use keystone::wal::{LogReader, LogScanner, RecordKind};
use keystone::{Config, Engine, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Keystone Admin
#[derive(Parser, Debug)]
#[command(name = "keystone-admin")]
#[command(about = "Inspect and maintain a Keystone data directory")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the log and report its health without modifying it
    Verify {
        /// Data directory
        data_dir: PathBuf,
    },

    /// Print log records
    Dump {
        /// Data directory
        data_dir: PathBuf,

        /// First LSN to print
        #[arg(short, long, default_value = "0")]
        from: u64,
    },

    /// Open the engine, run crash recovery and close it again
    Recover {
        /// Data directory
        data_dir: PathBuf,
    },

    /// Take a checkpoint (and truncate the log)
    Checkpoint {
        /// Data directory
        data_dir: PathBuf,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keystone=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Verify { data_dir } => verify(&data_dir),
        Commands::Dump { data_dir, from } => dump(&data_dir, from),
        Commands::Recover { data_dir } => recover(&data_dir),
        Commands::Checkpoint { data_dir } => checkpoint(&data_dir),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn wal_path(data_dir: &Path) -> PathBuf {
    data_dir.join(Config::WAL_FILENAME)
}

fn verify(data_dir: &Path) -> Result<()> {
    let report = LogScanner::verify(&wal_path(data_dir))?;

    println!("records:        {}", report.records_valid);
    println!("first LSN:      {}", report.first_lsn);
    println!("last LSN:       {}", report.last_lsn);
    println!("valid bytes:    {}", report.valid_bytes);
    println!("corrupted tail: {}", report.records_corrupted);
    println!("torn tail:      {}", if report.was_truncated { "yes" } else { "no" });
    Ok(())
}

fn dump(data_dir: &Path, from: u64) -> Result<()> {
    let reader = LogReader::open(&wal_path(data_dir))?;

    for record in reader.records() {
        let record = record?;
        if record.lsn < from {
            continue;
        }
        let detail = match &record.kind {
            RecordKind::Update { key, before, after } => format!(
                "key={} before={} after={}",
                String::from_utf8_lossy(key),
                show(before),
                show(after)
            ),
            RecordKind::Compensation { key, restored, undoes } => format!(
                "key={} restored={} undoes={}",
                String::from_utf8_lossy(key),
                show(restored),
                undoes
            ),
            RecordKind::CheckpointEnd(data) => format!(
                "begin={} active={:?} dirty={} next_txn={}",
                data.begin_lsn,
                data.active.iter().map(|t| t.txn_id).collect::<Vec<_>>(),
                data.dirty.len(),
                data.next_txn_id
            ),
            RecordKind::Begin
            | RecordKind::Commit
            | RecordKind::Abort
            | RecordKind::CheckpointBegin => String::new(),
        };
        println!("{:>8}  txn={:<6} {:<16} {}", record.lsn, record.txn_id, record.kind.name(), detail);
    }
    Ok(())
}

fn recover(data_dir: &Path) -> Result<()> {
    let engine = Engine::open_path(data_dir)?;
    let report = engine.recovery_report().clone();

    println!("start LSN:       {}", report.start_lsn);
    println!("records scanned: {}", report.records_scanned);
    println!("records redone:  {}", report.records_redone);
    println!("committed:       {}", report.committed);
    println!("losers:          {:?}", report.losers);
    println!("updates undone:  {}", report.updates_undone);
    println!("next txn id:     {}", report.next_txn_id);

    engine.close()
}

fn checkpoint(data_dir: &Path) -> Result<()> {
    let engine = Engine::open(
        Config::builder()
            .data_dir(data_dir)
            .checkpoint_after_recovery(false)
            .build(),
    )?;
    let stats = engine.checkpoint()?;

    println!("begin LSN:         {}", stats.begin_lsn);
    println!("end LSN:           {}", stats.end_lsn);
    println!("records truncated: {}", stats.records_truncated);

    engine.close()
}

fn show(value: &Option<Vec<u8>>) -> String {
    match value {
        Some(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
        None => "<absent>".to_string(),
    }
}
