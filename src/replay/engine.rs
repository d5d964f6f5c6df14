//! Replay Engine
//!
//! Drives one deterministic replay over a compiled event log:
//!
//! ```text
//! EventLogReader ─► OrderBook ─► Strategy ─► FillEngine ─► Portfolio ─► EquityCurve
//!                       │                                                    │
//!                       └─► FailurePolicyController (crossed books)          └─► TapeWriter
//! ```
//!
//! Per batch, in reader order: apply to the book; on a crossed book ask the
//! failure policy (abort, or revert the batch and move on with no strategy
//! call and no equity point); otherwise call the strategy, execute its
//! intents in order, apply fills, then mark to market and append one
//! equity point.
//!
//! In quarantine mode `replay_artifact` writes every skipped batch to a
//! JSONL quarantine file, whether the run finishes or aborts.

use crate::common::config::ReplayConfig;
use crate::common::errors::PipelineError;
use crate::common::types::{BatchId, QuoteAtoms};
use crate::evlog::format::Batch;
use crate::evlog::manifest::{ArtifactPaths, Manifest};
use crate::evlog::reader::EventLogReader;
use crate::ingest::failure_policy::{FailurePolicyController, FailurePolicyDecision, QuarantineItem};
use crate::ingest::quarantine::{write_quarantine_file, MemoryQuarantineSink, QuarantineRecord};
use crate::replay::book::OrderBook;
use crate::replay::equity_curve::EquityCurve;
use crate::replay::fees::FixedBpsFeeModel;
use crate::replay::matching::{Fill, FillEngine, OrderOutcome, Rejection};
use crate::replay::portfolio::Portfolio;
use crate::replay::strategy::{Strategy, StrategyContext, StrategyParams};
use crate::replay::strategy_factory::make_strategy;
use crate::replay::tape::{TapeHeader, TapeRecord, TapeWriter};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Applied { fills: usize, rejections: usize },
    /// Crossed book reverted under a skip decision.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub strategy: String,
    pub fills: Vec<Fill>,
    pub rejections: Vec<Rejection>,
    pub equity_curve: EquityCurve,
    pub portfolio: Portfolio,
    pub batches_applied: u64,
    pub batches_skipped: u64,
    pub quarantine: Vec<QuarantineRecord>,
    /// Quarantine file written by `replay_artifact` in quarantine mode.
    pub quarantine_path: Option<PathBuf>,
}

impl ReplayResult {
    pub fn final_equity(&self) -> Option<QuoteAtoms> {
        self.equity_curve.final_equity()
    }
}

pub struct ReplayEngine {
    config: ReplayConfig,
    book: OrderBook,
    portfolio: Portfolio,
    fill_engine: FillEngine,
    policy: FailurePolicyController<MemoryQuarantineSink>,
    curve: EquityCurve,
    fills: Vec<Fill>,
    rejections: Vec<Rejection>,
    reject_counts: BTreeMap<&'static str, u64>,
    batches_applied: u64,
    batches_skipped: u64,
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig, instrument_label: impl Into<String>) -> Result<Self, PipelineError> {
        config.validate()?;
        let fill_engine = FillEngine::new(FixedBpsFeeModel::new(config.fee_bps)?, instrument_label)
            .with_risk_limits(config.allow_short, config.allow_margin);
        let policy = FailurePolicyController::new(config.failure_policy, Some(MemoryQuarantineSink::new()))?;
        Ok(Self {
            book: OrderBook::new(),
            portfolio: Portfolio::new(config.initial_cash, config.initial_position),
            fill_engine,
            policy,
            curve: EquityCurve::new(),
            fills: Vec::new(),
            rejections: Vec::new(),
            reject_counts: BTreeMap::new(),
            batches_applied: 0,
            batches_skipped: 0,
            config,
        })
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn equity_curve(&self) -> &EquityCurve {
        &self.curve
    }

    /// Batches skipped so far under a quarantine decision.
    pub fn quarantine_records(&self) -> &[QuarantineRecord] {
        self.policy.sink().map(|sink| sink.records()).unwrap_or(&[])
    }

    /// Process one batch.
    pub fn step(
        &mut self,
        batch_id: BatchId,
        batch: &Batch,
        strategy: &mut dyn Strategy,
        mut tape: Option<&mut TapeWriter>,
    ) -> Result<StepOutcome, PipelineError> {
        if let Err(error) = self.book.apply_batch(batch_id, batch) {
            return match self.policy.on_error(error, QuarantineItem::batch(batch_id)) {
                FailurePolicyDecision::Abort(error) => Err(error),
                _ => {
                    self.book.revert_last_batch();
                    self.batches_skipped += 1;
                    Ok(StepOutcome::Skipped)
                }
            };
        }
        self.batches_applied += 1;

        let ctx = StrategyContext {
            batch_id,
            ts_recv_ns: batch.ts_recv_ns,
            cash: self.portfolio.cash(),
            position: self.portfolio.position(),
        };
        let intents = strategy.decide(&ctx, &self.book);

        let (mut filled, mut rejected) = (0, 0);
        for intent in intents {
            // Intents act on the book they were decided on.
            let intent = intent.for_batch(batch_id);
            if let Some(tape) = tape.as_deref_mut() {
                tape.write(&TapeRecord::Action {
                    ts_recv_ns: batch.ts_recv_ns,
                    batch_id: intent.batch_id,
                    action_id: self.fill_engine.next_action_id(),
                    side: intent.side,
                    lots: intent.lots,
                })?;
            }

            match self
                .fill_engine
                .execute(&intent, &self.book, &self.portfolio, batch.ts_recv_ns)
            {
                OrderOutcome::Filled(fill) => {
                    self.portfolio.apply_fill(&fill).map_err(|reason| {
                        PipelineError::schema_run(format!("fill {} not applicable: {}", fill.fill_id, reason))
                    })?;
                    tracing::debug!(
                        batch_id,
                        fill_id = fill.fill_id,
                        side = %fill.side,
                        ticks = fill.ticks,
                        lots = fill.lots,
                        fee = fill.fee,
                        "fill"
                    );
                    strategy.on_fill(&fill);
                    if let Some(tape) = tape.as_deref_mut() {
                        tape.write(&TapeRecord::from(&fill))?;
                    }
                    self.fills.push(fill);
                    filled += 1;
                }
                OrderOutcome::Rejected(rejection) => {
                    let count = self.reject_counts.entry(rejection.reason.code()).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        tracing::warn!(
                            batch_id,
                            action_id = rejection.action_id,
                            reason = rejection.reason.code(),
                            "order rejected: {}",
                            rejection.reason
                        );
                    } else {
                        tracing::debug!(batch_id, action_id = rejection.action_id, reason = rejection.reason.code(), "order rejected");
                    }
                    strategy.on_reject(&rejection);
                    if let Some(tape) = tape.as_deref_mut() {
                        tape.write(&TapeRecord::from(&rejection))?;
                    }
                    self.rejections.push(rejection);
                    rejected += 1;
                }
            }
        }

        let valuation = self
            .portfolio
            .mark_to_market(&self.book, self.config.mark_policy)
            .ok_or_else(|| PipelineError::schema_run(format!("equity overflows i64 at batch {}", batch_id)))?;
        let point = self.curve.record(
            batch.ts_recv_ns,
            batch_id,
            valuation.equity,
            self.portfolio.cash(),
            self.portfolio.position(),
            valuation.mark_ticks,
        )?;
        if let Some(tape) = tape {
            tape.write(&TapeRecord::from(point))?;
        }

        Ok(StepOutcome::Applied {
            fills: filled,
            rejections: rejected,
        })
    }

    /// Replay every batch `reader` yields (from `start_ts_ns` when set).
    pub fn run<R: Read + Seek>(
        mut self,
        reader: &mut EventLogReader<R>,
        strategy: &mut dyn Strategy,
        tape: Option<&mut TapeWriter>,
    ) -> Result<ReplayResult, PipelineError> {
        self.replay(reader, strategy, tape)?;
        Ok(self.finish(strategy))
    }

    /// `run` without consuming the engine, so the quarantine records
    /// collected so far stay reachable when the run aborts.
    pub fn replay<R: Read + Seek>(
        &mut self,
        reader: &mut EventLogReader<R>,
        strategy: &mut dyn Strategy,
        mut tape: Option<&mut TapeWriter>,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        if let Some(ts) = self.config.start_ts_ns {
            reader.seek_time(ts)?;
        }

        tracing::info!(
            strategy = strategy.name(),
            fee_bps = self.config.fee_bps,
            initial_cash = self.config.initial_cash,
            first_batch = reader.next_batch_id(),
            "replay started"
        );

        while let Some((batch_id, batch)) = reader.next_batch()? {
            self.step(batch_id, &batch, strategy, tape.as_deref_mut())?;
        }
        if let Some(tape) = tape {
            tape.flush()?;
        }

        tracing::info!(
            batches = self.batches_applied,
            skipped = self.batches_skipped,
            fills = self.fills.len(),
            rejections = self.rejections.len(),
            final_equity = ?self.curve.final_equity(),
            max_drawdown = self.curve.max_drawdown(),
            digest = %self.curve.digest(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "replay finished"
        );
        Ok(())
    }

    pub fn finish(self, strategy: &dyn Strategy) -> ReplayResult {
        let quarantine = self
            .policy
            .into_sink()
            .map(|sink| sink.into_records())
            .unwrap_or_default();
        ReplayResult {
            strategy: strategy.name().to_string(),
            fills: self.fills,
            rejections: self.rejections,
            equity_curve: self.curve,
            portfolio: self.portfolio,
            batches_applied: self.batches_applied,
            batches_skipped: self.batches_skipped,
            quarantine,
            quarantine_path: None,
        }
    }
}

/// Replay a compiled artifact with the strategy named in `config`.
///
/// Uses the index when the `.idx` file exists; it must hold one entry per
/// manifest batch. Fills are labelled with `config.instrument_label`,
/// defaulting to the manifest symbol. In quarantine mode the skipped
/// batches go to `config.quarantine_path` (default
/// `paths.replay_quarantine`), also when the run aborts.
pub fn replay_artifact(
    paths: &ArtifactPaths,
    config: &ReplayConfig,
    tape_path: Option<&Path>,
) -> Result<ReplayResult, PipelineError> {
    let manifest = Manifest::load(&paths.manifest)?;
    let mut reader = if paths.index.exists() {
        let reader = EventLogReader::open_with_index(&paths.evlog, &paths.index)?;
        if let Some(index) = reader.index() {
            index.validate_batch_count(manifest.batch_count)?;
        }
        reader
    } else {
        EventLogReader::open(&paths.evlog)?
    };
    if reader.header().version != manifest.format_version {
        return Err(PipelineError::decode(
            0,
            format!(
                "event log version {} differs from manifest version {}",
                reader.header().version,
                manifest.format_version
            ),
        ));
    }

    let mut strategy = make_strategy(&config.strategy.name, &StrategyParams::from(&config.strategy.params))?;
    let label = config
        .instrument_label
        .clone()
        .unwrap_or_else(|| manifest.symbol.clone());
    let mut engine = ReplayEngine::new(config.clone(), label)?;

    let mut tape = match tape_path {
        Some(path) => {
            let mut tape = TapeWriter::create(path)?;
            tape.write(&TapeRecord::Header(TapeHeader {
                strategy: strategy.name().to_string(),
                exchange: manifest.exchange.clone(),
                symbol: manifest.symbol.clone(),
                date: manifest.date.clone(),
                artifact_output_hash: manifest.output_hash.clone(),
                fee_bps: config.fee_bps,
                initial_cash: config.initial_cash,
                initial_position: config.initial_position,
            }))?;
            Some(tape)
        }
        None => None,
    };

    let outcome = engine.replay(&mut reader, &mut *strategy, tape.as_mut());

    let quarantine_path = if config.failure_policy.is_quarantine() {
        let path = config
            .quarantine_path
            .clone()
            .unwrap_or_else(|| paths.replay_quarantine.clone());
        let written = write_quarantine_file(&path, engine.quarantine_records())?;
        tracing::info!(path = %path.display(), records = written, "replay quarantine written");
        Some(path)
    } else {
        None
    };

    if let Err(e) = outcome {
        tracing::warn!(error = %e, "replay aborted");
        return Err(e);
    }
    let mut result = engine.finish(&*strategy);
    result.quarantine_path = quarantine_path;
    Ok(result)
}
