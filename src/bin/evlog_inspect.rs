//! Event Log Inspection Tool
//!
//! Usage:
//!   cargo run --release --bin evlog_inspect -- --evlog run.evlog manifest
//!   cargo run --release --bin evlog_inspect -- --evlog run.evlog verify
//!   cargo run --release --bin evlog_inspect -- --evlog run.evlog batches --from-ts-ns 1704067200000000000 --count 5
//!   cargo run --release --bin evlog_inspect -- --evlog run.evlog book --at-ts-ns 1704067260000000000 --depth 10

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evlog_backtest::evlog::{verify_artifact, ArtifactPaths, EventLogReader, Manifest};
use evlog_backtest::replay::OrderBook;
use std::path::PathBuf;

/// Inspect a compiled L2 event log artifact
#[derive(Parser, Debug)]
#[command(name = "evlog_inspect")]
#[command(about = "Inspect and verify compiled L2 event log artifacts")]
struct Cli {
    /// Path to the `.evlog` file
    #[arg(short, long)]
    evlog: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the manifest
    Manifest,

    /// Recompute hashes and cross-check log, index and manifest
    Verify,

    /// Print decoded batches
    Batches {
        /// Start at the first batch at or after this receive time
        #[arg(long)]
        from_ts_ns: Option<i64>,

        /// Number of batches to print
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Reconstruct the book up to a receive time and print top levels
    Book {
        /// Apply every batch with ts_recv_ns <= this value (default: all)
        #[arg(long)]
        at_ts_ns: Option<i64>,

        /// Levels per side
        #[arg(short, long, default_value = "5")]
        depth: usize,
    },
}

fn open_reader(paths: &ArtifactPaths) -> Result<EventLogReader<std::io::BufReader<std::fs::File>>> {
    let reader = if paths.index.exists() {
        EventLogReader::open_with_index(&paths.evlog, &paths.index)?
    } else {
        EventLogReader::open(&paths.evlog)?
    };
    Ok(reader)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let paths = ArtifactPaths::from_evlog(&cli.evlog);

    match cli.command {
        Commands::Manifest => {
            let manifest = Manifest::load(&paths.manifest)
                .with_context(|| format!("loading {}", paths.manifest.display()))?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Commands::Verify => {
            let report = verify_artifact(&paths)?;
            println!(
                "OK: {} batches, {} updates, {} bytes, output_hash={}",
                report.batch_count, report.update_count, report.bytes, report.manifest.output_hash
            );
        }
        Commands::Batches { from_ts_ns, count } => {
            let mut reader = open_reader(&paths)?;
            if let Some(ts) = from_ts_ns {
                reader.seek_time(ts)?;
            }
            println!(
                "price_increment={} amount_increment={}",
                reader.instrument().price_increment(),
                reader.instrument().amount_increment()
            );
            for _ in 0..count {
                let Some((batch_id, batch)) = reader.next_batch()? else {
                    break;
                };
                println!(
                    "#{} ts_recv_ns={} reset={} updates={}",
                    batch_id,
                    batch.ts_recv_ns,
                    batch.is_snapshot_reset,
                    batch.updates.len()
                );
                for u in &batch.updates {
                    println!("    {} {} x {}", u.side, u.ticks, u.lots);
                }
            }
        }
        Commands::Book { at_ts_ns, depth } => {
            let mut reader = open_reader(&paths)?;
            let mut book = OrderBook::new();
            let mut last = None;
            while let Some((batch_id, batch)) = reader.next_batch()? {
                if at_ts_ns.is_some_and(|ts| batch.ts_recv_ns > ts) {
                    break;
                }
                if let Err(e) = book.apply_batch(batch_id, &batch) {
                    println!("warning: {}", e);
                }
                last = Some((batch_id, batch.ts_recv_ns));
            }
            match last {
                Some((batch_id, ts)) => println!("book after batch #{} (ts_recv_ns={})", batch_id, ts),
                None => println!("no batches at or before the requested time"),
            }
            let (bid_levels, ask_levels) = book.depth();
            println!("levels: {} bids, {} asks", bid_levels, ask_levels);
            for level in book.top_asks(depth).iter().rev() {
                println!("    ask {:>12} x {}", level.ticks, level.lots);
            }
            println!("    ----");
            for level in book.top_bids(depth) {
                println!("    bid {:>12} x {}", level.ticks, level.lots);
            }
            if let Some(spread) = book.spread() {
                println!("spread: {} ticks", spread);
            }
        }
    }
    Ok(())
}
