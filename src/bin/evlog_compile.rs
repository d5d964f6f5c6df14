//! Event Log Compiler CLI
//!
//! Compiles a Tardis `incremental_book_L2` CSV into `{prefix}.evlog`,
//! `{prefix}.idx` and `{prefix}.manifest.json` (plus
//! `{prefix}.quarantine.jsonl` in quarantine mode).
//!
//! Usage:
//!   cargo run --release --bin evlog_compile -- input.csv --out-dir ./artifacts \
//!       --price-increment 0.01 --amount-increment 0.001
//!   cargo run --release --bin evlog_compile -- input.csv --out-dir ./artifacts --infer \
//!       --mode quarantine --granularity skip-row
//!   cargo run --release --bin evlog_compile -- input.csv --config compile.toml

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use evlog_backtest::common::{
    load_from_path, CompileConfig, FailureMode, FailurePolicyConfig, InstrumentSource,
    InstrumentSpec, QuarantineGranularity,
};
use evlog_backtest::ingest::compile;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    HardFail,
    Quarantine,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Granularity {
    SkipRow,
    SkipBatch,
    HaltAfterErrors,
}

/// Compile an L2 CSV into a binary event log artifact
#[derive(Parser, Debug)]
#[command(name = "evlog_compile")]
#[command(about = "Compile Tardis L2 CSV into a hashed binary event log")]
struct Cli {
    /// Input CSV file
    input: PathBuf,

    /// Output directory for the artifact files
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// TOML compile config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Price increment (decimal string)
    #[arg(long, requires = "amount_increment")]
    price_increment: Option<String>,

    /// Amount increment (decimal string)
    #[arg(long, requires = "price_increment")]
    amount_increment: Option<String>,

    /// Look increments up in a static instrument metadata JSON file
    #[arg(long, conflicts_with_all = ["price_increment", "infer"])]
    instrument_meta: Option<PathBuf>,

    /// Infer increments from the first rows of the input
    #[arg(long, conflicts_with = "price_increment")]
    infer: bool,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    #[arg(long, value_enum)]
    granularity: Option<Granularity>,

    /// Abort on this many quarantined items (halt-after-errors)
    #[arg(long)]
    max_errors: Option<u64>,

    /// Output file prefix (default: {exchange}_{symbol}_{date})
    #[arg(long)]
    prefix: Option<String>,

    #[arg(long)]
    exchange: Option<String>,

    #[arg(long)]
    symbol: Option<String>,

    /// Artifact date, YYYY-MM-DD (default: UTC date of the first row)
    #[arg(long)]
    date: Option<String>,
}

fn build_config(cli: &Cli) -> Result<CompileConfig> {
    let instrument_flag = match (&cli.price_increment, &cli.amount_increment) {
        (Some(p), Some(a)) => Some(InstrumentSource::Explicit(InstrumentSpec::new(p.clone(), a.clone()))),
        _ => cli
            .instrument_meta
            .as_ref()
            .map(|path| InstrumentSource::StaticMetadata { path: path.clone() })
            .or(cli.infer.then_some(InstrumentSource::Inferred)),
    };

    let mut config = match (&cli.config, instrument_flag) {
        (Some(path), flag) => {
            let mut config: CompileConfig = load_from_path(path)?;
            if let Some(instrument) = flag {
                config.instrument = instrument;
            }
            config
        }
        (None, Some(instrument)) => CompileConfig::new(instrument),
        (None, None) => bail!(
            "no instrument source: pass --price-increment/--amount-increment, --instrument-meta, --infer or --config"
        ),
    };

    let mut policy: FailurePolicyConfig = config.failure_policy;
    if let Some(mode) = cli.mode {
        policy.mode = match mode {
            Mode::HardFail => FailureMode::HardFail,
            Mode::Quarantine => FailureMode::Quarantine,
        };
    }
    if let Some(granularity) = cli.granularity {
        policy.granularity = match granularity {
            Granularity::SkipRow => QuarantineGranularity::SkipRow,
            Granularity::SkipBatch => QuarantineGranularity::SkipBatch,
            Granularity::HaltAfterErrors => QuarantineGranularity::HaltAfterErrors,
        };
    }
    if let Some(max_errors) = cli.max_errors {
        policy.max_errors = max_errors;
    }
    config.failure_policy = policy;

    if cli.prefix.is_some() {
        config.output_prefix = cli.prefix.clone();
    }
    if cli.exchange.is_some() {
        config.exchange = cli.exchange.clone();
    }
    if cli.symbol.is_some() {
        config.symbol = cli.symbol.clone();
    }
    if cli.date.is_some() {
        config.date = cli.date.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let outcome = compile(&cli.input, &cli.out_dir, &config)
        .with_context(|| format!("compiling {}", cli.input.display()))?;

    println!("evlog:     {}", outcome.paths.evlog.display());
    println!("index:     {}", outcome.paths.index.display());
    println!("manifest:  {}", outcome.paths.manifest.display());
    if config.failure_policy.is_quarantine() {
        println!("quarantine: {} ({} records)", outcome.paths.quarantine.display(), outcome.manifest.quarantine_count);
    }
    println!(
        "rows={} batches={} updates={} output_hash={}",
        outcome.manifest.row_count,
        outcome.manifest.batch_count,
        outcome.manifest.update_count,
        outcome.manifest.output_hash
    );
    Ok(())
}
