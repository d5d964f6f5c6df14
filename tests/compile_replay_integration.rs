//! Integration tests: CSV → compiled artifact → replay.
//!
//! Each test writes a small Tardis-style CSV into a temporary directory,
//! compiles it and replays the resulting event log.

use evlog_backtest::common::{
    CompileConfig, FailurePolicyConfig, QuarantineGranularity, ReplayConfig, StrategyConfig,
};
use evlog_backtest::evlog::{verify_artifact, ArtifactPaths, EventIndex, EventLogReader};
use evlog_backtest::ingest::{compile, read_quarantine_jsonl};
use evlog_backtest::replay::{read_tape, replay_artifact, RejectReason, TapeRecord};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const HEADER: &str = "exchange,symbol,timestamp,local_timestamp,is_snapshot,side,price,amount\n";

// 2024-01-01T00:00:00Z in microseconds
const T0: i64 = 1_704_067_200_000_000;

/// Snapshot at T0, then a few incremental updates around a 100.00/100.01 book.
fn market_csv() -> String {
    let mut body = String::from(HEADER);
    let rows: &[(i64, bool, &str, &str, &str)] = &[
        (0, true, "bid", "100.00", "5"),
        (0, true, "bid", "99.99", "8"),
        (0, true, "ask", "100.01", "4"),
        (0, true, "ask", "100.02", "9"),
        (1_000, false, "ask", "100.01", "6"),
        (2_000, false, "bid", "100.00", "3"),
        (3_000, false, "bid", "100.01", "2"),
        (3_000, false, "ask", "100.01", "0"),
        (4_000, false, "ask", "100.03", "7"),
        (5_000, false, "bid", "100.01", "0"),
    ];
    for (dt, snap, side, price, amount) in rows {
        body.push_str(&format!(
            "deribit,BTC-PERPETUAL,{},{},{},{},{},{}\n",
            T0 + dt - 5,
            T0 + dt,
            snap,
            side,
            price,
            amount
        ));
    }
    body
}

fn compile_fixture(dir: &Path, csv: &str, config: &CompileConfig) -> ArtifactPaths {
    let input = dir.join("input.csv");
    fs::write(&input, csv).unwrap();
    compile(&input, &dir.join("out"), config).unwrap().paths
}

fn replay_config(strategy: StrategyConfig) -> ReplayConfig {
    ReplayConfig {
        strategy,
        initial_cash: 10_000_000,
        ..ReplayConfig::default()
    }
}

#[test]
fn test_compile_then_replay_dummy() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &market_csv(), &CompileConfig::explicit("0.01", "1"));
    assert_eq!(
        paths,
        ArtifactPaths::new(&tmp.path().join("out"), "deribit_BTC-PERPETUAL_2024-01-01")
    );
    verify_artifact(&paths).unwrap();

    let config = replay_config(StrategyConfig::new("dummy"));
    let result = replay_artifact(&paths, &config, None).unwrap();

    assert_eq!(result.batches_applied, 6);
    assert_eq!(result.equity_curve.len(), 6);
    // Buy at 10001, sell at 10000, buy at 10002 (best ask after 100.01 was
    // removed is 100.02), sell at 10001, ...
    let prices: Vec<i64> = result.fills.iter().map(|f| f.ticks).collect();
    assert_eq!(prices[0], 10_001);
    assert_eq!(prices[1], 10_000);
    assert!(result.fills.iter().all(|f| f.instrument == "BTC-PERPETUAL"));
    assert_eq!(
        result.portfolio.cash(),
        10_000_000
            - result
                .fills
                .iter()
                .map(|f| f.side.sign() * f.notional + f.fee)
                .sum::<i64>()
    );
}

#[test]
fn test_replay_is_deterministic_across_runs() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &market_csv(), &CompileConfig::explicit("0.01", "1"));
    let strategy = StrategyConfig::new("random")
        .with_param("seed", 1234)
        .with_param("order_pct", 70)
        .with_param("max_lots", 6);
    let config = ReplayConfig {
        fee_bps: 5,
        ..replay_config(strategy)
    };

    let tape_a = tmp.path().join("a.jsonl");
    let tape_b = tmp.path().join("b.jsonl");
    let a = replay_artifact(&paths, &config, Some(&tape_a)).unwrap();
    let b = replay_artifact(&paths, &config, Some(&tape_b)).unwrap();

    assert_eq!(a.equity_curve.digest(), b.equity_curve.digest());
    assert_eq!(a.fills, b.fills);
    assert_eq!(fs::read(&tape_a).unwrap(), fs::read(&tape_b).unwrap());

    let records = read_tape(&fs::read_to_string(&tape_a).unwrap()).unwrap();
    assert!(matches!(records[0], TapeRecord::Header(_)));
    let equity_records = records
        .iter()
        .filter(|r| matches!(r, TapeRecord::Equity { .. }))
        .count();
    assert_eq!(equity_records, a.equity_curve.len());
    let fill_records = records
        .iter()
        .filter(|r| matches!(r, TapeRecord::Fill { .. }))
        .count();
    assert_eq!(fill_records, a.fills.len());
}

#[test]
fn test_recompile_gives_identical_hashes() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input.csv");
    fs::write(&input, market_csv()).unwrap();
    let config = CompileConfig::explicit("0.01", "1");
    let a = compile(&input, &tmp.path().join("a"), &config).unwrap();
    let b = compile(&input, &tmp.path().join("b"), &config).unwrap();
    assert_eq!(a.manifest.input_hash, b.manifest.input_hash);
    assert_eq!(a.manifest.output_hash, b.manifest.output_hash);
}

#[test]
fn test_quantization_exactness_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &market_csv(), &CompileConfig::explicit("0.01", "1"));
    let reader = EventLogReader::open(&paths.evlog).unwrap();
    let instrument = *reader.instrument();
    let prices: Vec<String> = reader
        .flat_map(|b| b.unwrap().1.updates)
        .map(|u| instrument.price_of(u.ticks).to_string())
        .collect();
    // Normalized decimals: no float noise, no trailing zeros.
    assert_eq!(prices[0], "100");
    assert_eq!(prices[1], "99.99");
    assert!(prices.contains(&"100.03".to_string()));
}

/// 100.01 bid against a 100.01 ask: crossed at T0+1ms.
fn crossed_csv() -> String {
    let mut csv = String::from(HEADER);
    csv.push_str(&format!("deribit,BTC-PERPETUAL,{0},{0},false,bid,100.00,5\n", T0));
    csv.push_str(&format!("deribit,BTC-PERPETUAL,{0},{0},false,ask,100.01,5\n", T0));
    csv.push_str(&format!("deribit,BTC-PERPETUAL,{0},{0},false,bid,100.01,1\n", T0 + 1_000));
    csv.push_str(&format!("deribit,BTC-PERPETUAL,{0},{0},false,ask,100.02,1\n", T0 + 2_000));
    csv
}

fn read_replay_quarantine(path: &Path) -> Vec<Option<u64>> {
    read_quarantine_jsonl(&fs::read_to_string(path).unwrap())
        .unwrap()
        .iter()
        .map(|r| r.batch_id)
        .collect()
}

#[test]
fn test_crossed_input_replays_under_quarantine() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &crossed_csv(), &CompileConfig::explicit("0.01", "1"));

    let hard = replay_config(StrategyConfig::new("noop"));
    let err = replay_artifact(&paths, &hard, None).unwrap_err();
    assert_eq!(err.reason_code(), "crossed_book_detected");

    let lenient = ReplayConfig {
        failure_policy: FailurePolicyConfig::quarantine(QuarantineGranularity::SkipBatch),
        ..replay_config(StrategyConfig::new("noop"))
    };
    let result = replay_artifact(&paths, &lenient, None).unwrap();
    assert_eq!(result.batches_applied, 2);
    assert_eq!(result.batches_skipped, 1);
    assert_eq!(result.quarantine[0].batch_id, Some(1));
    assert_eq!(result.quarantine_path.as_deref(), Some(paths.replay_quarantine.as_path()));
    assert_eq!(read_replay_quarantine(&paths.replay_quarantine), vec![Some(1)]);
    // The compile-time quarantine file is a different file.
    assert!(!paths.quarantine.exists());
}

#[test]
fn test_replay_quarantine_written_when_run_aborts() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &crossed_csv(), &CompileConfig::explicit("0.01", "1"));
    let out = tmp.path().join("skipped.jsonl");
    let config = ReplayConfig {
        failure_policy: FailurePolicyConfig::halt_after(1),
        quarantine_path: Some(out.clone()),
        ..replay_config(StrategyConfig::new("noop"))
    };
    let err = replay_artifact(&paths, &config, None).unwrap_err();
    assert_eq!(err.reason_code(), "crossed_book_detected");
    assert_eq!(read_replay_quarantine(&out), vec![Some(1)]);
    assert!(!paths.replay_quarantine.exists());
}

#[test]
fn test_truncated_index_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &market_csv(), &CompileConfig::explicit("0.01", "1"));
    let full = EventIndex::load(&paths.index).unwrap();
    let mut truncated = EventIndex::new();
    truncated.push(full.entries()[0]).unwrap();
    fs::write(&paths.index, truncated.encode()).unwrap();

    let config = ReplayConfig {
        start_ts_ns: Some((T0 + 2_000) * 1_000),
        ..replay_config(StrategyConfig::new("noop"))
    };
    let err = replay_artifact(&paths, &config, None).unwrap_err();
    assert_eq!(err.reason_code(), "index_mismatch");
}

#[test]
fn test_oversized_order_rejected_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &market_csv(), &CompileConfig::explicit("0.01", "1"));
    let config = replay_config(StrategyConfig::new("dummy").with_param("lots", 1_000));
    let result = replay_artifact(&paths, &config, None).unwrap();
    assert!(result.fills.is_empty());
    assert!(result
        .rejections
        .iter()
        .all(|r| matches!(r.reason, RejectReason::InsufficientLiquidity { .. })));
    assert_eq!(result.portfolio.cash(), 10_000_000);
    assert!(result
        .equity_curve
        .points()
        .iter()
        .all(|p| p.equity == 10_000_000));
}

#[test]
fn test_start_ts_skips_earlier_batches() {
    let tmp = TempDir::new().unwrap();
    let paths = compile_fixture(tmp.path(), &market_csv(), &CompileConfig::explicit("0.01", "1"));
    let config = ReplayConfig {
        start_ts_ns: Some((T0 + 2_000) * 1_000),
        ..replay_config(StrategyConfig::new("noop"))
    };
    let result = replay_artifact(&paths, &config, None).unwrap();
    assert_eq!(result.batches_applied, 4);
    assert_eq!(result.equity_curve.points()[0].batch_id, 2);
}

fn bin(name: &str) -> PathBuf {
    match name {
        "evlog_compile" => PathBuf::from(env!("CARGO_BIN_EXE_evlog_compile")),
        "evlog_replay" => PathBuf::from(env!("CARGO_BIN_EXE_evlog_replay")),
        _ => PathBuf::from(env!("CARGO_BIN_EXE_evlog_inspect")),
    }
}

#[test]
fn test_cli_compile_inspect_replay() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input.csv");
    fs::write(&input, market_csv()).unwrap();
    let out = tmp.path().join("out");

    let status = Command::new(bin("evlog_compile"))
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .args(["--price-increment", "0.01", "--amount-increment", "1", "--prefix", "cli"])
        .status()
        .unwrap();
    assert!(status.success());

    let evlog = out.join("cli.evlog");
    let verify = Command::new(bin("evlog_inspect"))
        .arg("--evlog")
        .arg(&evlog)
        .arg("verify")
        .output()
        .unwrap();
    assert!(verify.status.success());
    assert!(String::from_utf8_lossy(&verify.stdout).contains("OK: 6 batches"));

    let replay = Command::new(bin("evlog_replay"))
        .arg(&evlog)
        .args(["--strategy", "random", "--param", "seed=3", "--initial-cash", "1000000", "--verify"])
        .output()
        .unwrap();
    assert!(replay.status.success());
    assert!(String::from_utf8_lossy(&replay.stdout).contains("batches applied: 6"));
}

#[test]
fn test_cli_compile_failure_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input.csv");
    fs::write(&input, format!("{}deribit,X,{1},{1},false,bid,1.001,1\n", HEADER, T0)).unwrap();
    let status = Command::new(bin("evlog_compile"))
        .arg(&input)
        .arg("--out-dir")
        .arg(tmp.path().join("out"))
        .args(["--price-increment", "0.01", "--amount-increment", "1"])
        .status()
        .unwrap();
    assert!(!status.success());
}
