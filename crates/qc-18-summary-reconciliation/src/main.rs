//! # Summary Reconciler
//!
//! Replays a JSON-lines dump of pump records through the reconciliation
//! engine against in-memory backends and prints the resulting summaries.
//!
//! ```text
//! summary-reconciler replay --input events.jsonl [--config recon.toml] [--batch-size 100]
//!                           [--address 0x..]...
//! summary-reconciler config [--config recon.toml]
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qc_18_summary_reconciliation::{
    InMemoryEventLog, InMemorySummaryStore, PrometheusMetrics, ReconciliationConfig,
    ReconciliationEngine, SummarySnapshot,
};
use shared_types::{address_hex, parse_address, Address, PumpRecord};

/// Summary Reconciler: delta-merge-and-apply of chain events
#[derive(Parser, Debug)]
#[command(name = "summary-reconciler")]
#[command(about = "Reconcile chain events into per-address summaries")]
struct Args {
    /// TOML configuration file (environment variables still override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines file of pump records and print the summaries
    Replay {
        /// Input file, one `PumpRecord` per line
        #[arg(short, long)]
        input: PathBuf,

        /// Records per batch (overrides `max_batch_size`)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Only print the summaries of these addresses (0x-prefixed hex)
        #[arg(short, long = "address")]
        addresses: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

/// Printed form of a summary row.
#[derive(Serialize)]
struct SummaryView {
    address: String,
    balance: String,
    total_received: String,
    tx_number: i64,
    mined_block_number: i64,
    mined_uncle_number: i64,
    version: u64,
    offset_committed: bool,
    first_seen_at: u64,
    last_seen_at: u64,
}

impl From<&SummarySnapshot> for SummaryView {
    fn from(row: &SummarySnapshot) -> Self {
        Self {
            address: address_hex(&row.key),
            balance: row.fields.balance.to_string(),
            total_received: row.fields.total_received.to_string(),
            tx_number: row.fields.tx_number,
            mined_block_number: row.fields.mined_block_number,
            mined_uncle_number: row.fields.mined_uncle_number,
            version: row.version,
            offset_committed: row.offset_committed,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ReconciliationConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ReconciliationConfig::from_env().context("reading environment")?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Replay {
            input,
            batch_size,
            addresses,
        } => {
            let only = addresses
                .iter()
                .map(|raw| parse_address(raw).with_context(|| format!("invalid address {raw}")))
                .collect::<Result<Vec<Address>>>()?;
            replay(config, &input, batch_size, &only).await
        }
    }
}

async fn replay(
    mut config: ReconciliationConfig,
    input: &Path,
    batch_size: Option<usize>,
    only: &[Address],
) -> Result<()> {
    if let Some(size) = batch_size {
        config.max_batch_size = size;
    }
    config.validate()?;

    let log = Arc::new(InMemoryEventLog::new());
    let loaded = load_records(&log, input)?;
    info!(records = loaded, partitions = log.partitions().len(), "Records loaded");

    let store = Arc::new(InMemorySummaryStore::new());
    let max_batch = config.max_batch_size;
    let engine = ReconciliationEngine::new(config, Arc::clone(&store), Arc::clone(&log))
        .with_metrics(Arc::new(PrometheusMetrics));

    for (topic, partition) in log.partitions() {
        let consumer = log.consumer(topic.clone(), partition, max_batch);
        let stats = engine
            .drain(&consumer)
            .await
            .with_context(|| format!("draining {topic}/{partition}"))?;
        info!(
            topic = %topic,
            partition,
            batches = stats.committed,
            reverted = stats.reverted,
            records = stats.records,
            lag = log.lag(&topic, partition),
            "Partition drained"
        );
    }
    engine.shutdown();

    let mut rows: Vec<SummarySnapshot> = store
        .snapshot()
        .into_values()
        .filter(|row| only.is_empty() || only.contains(&row.key))
        .collect();
    rows.sort_by_key(|row| row.key);
    let views: Vec<SummaryView> = rows.iter().map(SummaryView::from).collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

/// Append every record of `input` to `log`. Offsets are reassigned per
/// partition in file order.
fn load_records(log: &InMemoryEventLog, input: &Path) -> Result<usize> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut count = 0;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PumpRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", input.display(), line_no + 1))?;
        log.append(&record.topic, record.partition, record.key, record.value);
        count += 1;
    }

    Ok(count)
}
