//! Event Log Replay CLI
//!
//! Replays a compiled artifact through a strategy and prints the run
//! summary. Optionally writes the JSONL tape and the equity curve.
//!
//! Usage:
//!   cargo run --release --bin evlog_replay -- artifacts/binance_BTCUSDT_2024-01-01.evlog \
//!       --strategy random --param seed=7 --param max_lots=5 --fee-bps 2 --initial-cash 1000000
//!   cargo run --release --bin evlog_replay -- run.evlog --config replay.toml --tape tape.jsonl
//!   cargo run --release --bin evlog_replay -- --list-strategies

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use evlog_backtest::common::{load_from_path, MarkPolicy, ReplayConfig};
use evlog_backtest::evlog::{verify_artifact, ArtifactPaths};
use evlog_backtest::replay::{available_strategies, replay_artifact};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mark {
    Mid,
    Liquidation,
}

/// Replay a compiled event log
#[derive(Parser, Debug)]
#[command(name = "evlog_replay")]
#[command(about = "Deterministic strategy replay over a compiled L2 event log")]
struct Cli {
    /// Path to the `.evlog` file (index and manifest are found next to it)
    #[arg(required_unless_present = "list_strategies")]
    evlog: Option<PathBuf>,

    /// TOML replay config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Strategy name (see --list-strategies)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Strategy parameter, KEY=INTEGER (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, i64)>,

    #[arg(long)]
    fee_bps: Option<i64>,

    #[arg(long)]
    initial_cash: Option<i64>,

    #[arg(long)]
    initial_position: Option<i64>,

    /// Reject sells beyond the held position
    #[arg(long)]
    no_short: bool,

    /// Reject buys beyond available cash
    #[arg(long)]
    no_margin: bool,

    #[arg(long, value_enum)]
    mark: Option<Mark>,

    /// Start at the first batch with ts_recv_ns >= this value
    #[arg(long)]
    start_ts_ns: Option<i64>,

    /// Write the action/fill/equity tape here (JSONL)
    #[arg(long)]
    tape: Option<PathBuf>,

    /// Where quarantined batches go in quarantine mode
    /// (default: `{prefix}.replay.quarantine.jsonl` next to the artifact)
    #[arg(long)]
    quarantine_out: Option<PathBuf>,

    /// Write the equity curve here (JSON)
    #[arg(long)]
    equity_out: Option<PathBuf>,

    /// Recompute artifact hashes before replaying
    #[arg(long)]
    verify: bool,

    #[arg(long)]
    list_strategies: bool,
}

fn parse_param(s: &str) -> Result<(String, i64), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))?;
    let value = value
        .parse::<i64>()
        .map_err(|e| format!("invalid value for {}: {}", key, e))?;
    Ok((key.to_string(), value))
}

fn build_config(cli: &Cli) -> Result<ReplayConfig> {
    let mut config: ReplayConfig = match &cli.config {
        Some(path) => load_from_path(path)?,
        None => ReplayConfig::default(),
    };
    if let Some(name) = &cli.strategy {
        config.strategy.name = name.clone();
    }
    for (key, value) in &cli.params {
        config.strategy.params.insert(key.clone(), *value);
    }
    if let Some(fee_bps) = cli.fee_bps {
        config.fee_bps = fee_bps;
    }
    if let Some(cash) = cli.initial_cash {
        config.initial_cash = cash;
    }
    if let Some(position) = cli.initial_position {
        config.initial_position = position;
    }
    if cli.no_short {
        config.allow_short = false;
    }
    if cli.no_margin {
        config.allow_margin = false;
    }
    if let Some(mark) = cli.mark {
        config.mark_policy = match mark {
            Mark::Mid => MarkPolicy::Mid,
            Mark::Liquidation => MarkPolicy::Liquidation,
        };
    }
    if cli.start_ts_ns.is_some() {
        config.start_ts_ns = cli.start_ts_ns;
    }
    if cli.quarantine_out.is_some() {
        config.quarantine_path = cli.quarantine_out.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.list_strategies {
        for (name, description) in available_strategies() {
            println!("{:<10} {}", name, description);
        }
        return Ok(());
    }

    let evlog = cli.evlog.clone().ok_or_else(|| anyhow!("missing event log path"))?;
    let paths = ArtifactPaths::from_evlog(&evlog);
    let config = build_config(&cli)?;

    if cli.verify {
        let report = verify_artifact(&paths).with_context(|| format!("verifying {}", evlog.display()))?;
        tracing::info!(batches = report.batch_count, bytes = report.bytes, "artifact verified");
    }

    let result = replay_artifact(&paths, &config, cli.tape.as_deref())
        .with_context(|| format!("replaying {}", evlog.display()))?;

    if let Some(path) = &cli.equity_out {
        let json = serde_json::to_vec_pretty(result.equity_curve.points())?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    println!("strategy:        {}", result.strategy);
    println!("batches applied: {}", result.batches_applied);
    println!("batches skipped: {}", result.batches_skipped);
    println!("fills:           {}", result.fills.len());
    println!("rejections:      {}", result.rejections.len());
    println!("cash:            {}", result.portfolio.cash());
    println!("position:        {}", result.portfolio.position());
    println!("fees:            {}", result.portfolio.total_fees());
    match result.final_equity() {
        Some(equity) => println!("final equity:    {}", equity),
        None => println!("final equity:    n/a (no batches)"),
    }
    println!("max drawdown:    {}", result.equity_curve.max_drawdown());
    println!("curve digest:    {}", result.equity_curve.digest());
    if let Some(path) = &result.quarantine_path {
        println!("quarantine:      {} ({} records)", path.display(), result.quarantine.len());
    }
    if result.equity_curve.len() >= 2 {
        let returns = result.equity_curve.returns_bps(config.initial_cash)?;
        let total: i64 = returns.iter().sum();
        println!("sum of returns:  {} bps over {} steps", total, returns.len());
    }
    Ok(())
}
