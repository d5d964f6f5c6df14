//! Batch assembly.
//!
//! Groups consecutive rows sharing one `local_timestamp` into a `Batch`,
//! routing every row through validation and quantization and every error
//! through the Failure-Policy Controller.
//!
//! Group ids count every distinct timestamp group seen in the input,
//! emitted or not; they are what compile-time quarantine records carry.
//!
//! Snapshot resets: a batch whose rows are snapshot rows and whose
//! predecessor (the previously emitted batch) was not a snapshot batch
//! clears the book before applying.

use crate::common::errors::PipelineError;
use crate::common::types::{BatchId, NANOS_PER_MICRO};
use crate::evlog::format::{Batch, LevelUpdate, MAX_UPDATES_PER_BATCH};
use crate::ingest::csv_source::RawRow;
use crate::ingest::failure_policy::{FailurePolicyController, FailurePolicyDecision, QuarantineItem};
use crate::ingest::quantizer::Quantizer;
use crate::ingest::quarantine::QuarantineSink;
use crate::ingest::validation::{SchemaValidator, ValidatedRow};
use std::collections::BTreeMap;
use tracing::debug;

/// A batch ready for the writer plus what the input hash needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledBatch {
    pub group_id: BatchId,
    pub batch: Batch,
    pub row_count: u64,
    /// Canonical encoding of the accepted rows, in input order.
    pub canonical_rows: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub rows_seen: u64,
    pub rows_accepted: u64,
    pub rows_dropped: u64,
    pub groups_seen: u64,
    pub batches_emitted: u64,
    pub batches_dropped: u64,
}

struct OpenGroup {
    group_id: BatchId,
    ts_us: i64,
    is_snapshot: Option<bool>,
    updates: Vec<LevelUpdate>,
    canonical: Vec<u8>,
    rows: u64,
    skipping: bool,
}

impl OpenGroup {
    fn new(group_id: BatchId, ts_us: i64) -> Self {
        Self {
            group_id,
            ts_us,
            is_snapshot: None,
            updates: Vec::new(),
            canonical: Vec::new(),
            rows: 0,
            skipping: false,
        }
    }
}

/// Canonical byte encoding of one accepted row (input hash payload).
pub fn encode_canonical_row(row: &ValidatedRow, out: &mut Vec<u8>) {
    out.extend_from_slice(&row.local_timestamp_us.to_le_bytes());
    out.extend_from_slice(&row.exchange_timestamp_us.to_le_bytes());
    out.push(row.side.as_u8());
    out.push(u8::from(row.is_snapshot));
    for text in [&row.price_text, &row.amount_text] {
        out.extend_from_slice(&(text.len() as u32).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
    }
}

pub struct BatchAssembler<'p, S: QuarantineSink> {
    validator: SchemaValidator,
    quantizer: Quantizer,
    policy: &'p mut FailurePolicyController<S>,
    identity: Option<(String, String)>,
    group: Option<OpenGroup>,
    next_group_id: BatchId,
    prev_emitted_snapshot: bool,
    stats: AssemblerStats,
}

impl<'p, S: QuarantineSink> BatchAssembler<'p, S> {
    pub fn new(quantizer: Quantizer, policy: &'p mut FailurePolicyController<S>) -> Self {
        Self {
            validator: SchemaValidator::new(),
            quantizer,
            policy,
            identity: None,
            group: None,
            next_group_id: 0,
            prev_emitted_snapshot: false,
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// `(exchange, symbol)` of the first accepted row.
    pub fn identity(&self) -> Option<&(String, String)> {
        self.identity.as_ref()
    }

    /// Feed one row; returns the previous batch when this row closes it.
    pub fn push_row(&mut self, row: RawRow) -> Result<Option<AssembledBatch>, PipelineError> {
        self.stats.rows_seen += 1;

        let ts_us = match self.validator.check_timestamp(&row) {
            Ok(ts) => ts,
            Err(err) => {
                // No timestamp group to attach to: only the row itself can go.
                let item = QuarantineItem::row(row.row_ref(), None, row.raw_fields());
                return match self.policy.on_error(err, item) {
                    FailurePolicyDecision::Abort(e) => Err(e),
                    _ => {
                        self.stats.rows_dropped += 1;
                        Ok(None)
                    }
                };
            }
        };

        let opens_group = self.group.as_ref().map_or(true, |g| g.ts_us != ts_us);
        let completed = if opens_group {
            let done = self.close_group()?;
            self.group = Some(OpenGroup::new(self.next_group_id, ts_us));
            self.next_group_id += 1;
            self.stats.groups_seen += 1;
            done
        } else {
            None
        };

        let (group_id, skipping, expected_snapshot) = match &self.group {
            Some(g) => (g.group_id, g.skipping, g.is_snapshot),
            None => return Ok(completed),
        };
        if skipping {
            self.stats.rows_dropped += 1;
            return Ok(completed);
        }

        match self.accept(&row, ts_us, expected_snapshot) {
            Ok((update, validated)) => {
                if self.identity.is_none() {
                    self.identity = Some((validated.exchange.clone(), validated.symbol.clone()));
                }
                if let Some(group) = self.group.as_mut() {
                    group.is_snapshot.get_or_insert(validated.is_snapshot);
                    group.updates.push(update);
                    encode_canonical_row(&validated, &mut group.canonical);
                    group.rows += 1;
                }
            }
            Err(err) => {
                let item = QuarantineItem::row(row.row_ref(), Some(group_id), row.raw_fields());
                match self.policy.on_error(err, item) {
                    FailurePolicyDecision::Abort(e) => return Err(e),
                    FailurePolicyDecision::SkipBatch => self.drop_open_group(1),
                    FailurePolicyDecision::SkipRow | FailurePolicyDecision::Continue => {
                        self.stats.rows_dropped += 1;
                    }
                }
            }
        }
        Ok(completed)
    }

    /// Route an unreadable input record through the policy.
    pub fn push_unreadable(&mut self, err: PipelineError) -> Result<(), PipelineError> {
        self.stats.rows_seen += 1;
        let item = QuarantineItem {
            row: err.row(),
            batch_id: None,
            raw_fields: BTreeMap::new(),
        };
        match self.policy.on_error(err, item) {
            FailurePolicyDecision::Abort(e) => Err(e),
            _ => {
                self.stats.rows_dropped += 1;
                Ok(())
            }
        }
    }

    /// Close the last open group.
    pub fn finish(&mut self) -> Result<Option<AssembledBatch>, PipelineError> {
        self.close_group()
    }

    fn accept(
        &self,
        row: &RawRow,
        ts_us: i64,
        expected_snapshot: Option<bool>,
    ) -> Result<(LevelUpdate, ValidatedRow), PipelineError> {
        let validated = self.validator.check_fields(row, ts_us)?;
        if let Some((exchange, symbol)) = &self.identity {
            if *exchange != validated.exchange || *symbol != validated.symbol {
                return Err(PipelineError::schema_row(
                    validated.row,
                    format!(
                        "instrument {}/{} differs from stream instrument {}/{}",
                        validated.exchange, validated.symbol, exchange, symbol
                    ),
                ));
            }
        }
        if let Some(expected) = expected_snapshot {
            if expected != validated.is_snapshot {
                return Err(PipelineError::schema_row(
                    validated.row,
                    format!(
                        "is_snapshot {} differs from the rest of its batch ({})",
                        validated.is_snapshot, expected
                    ),
                ));
            }
        }
        let update = self.quantizer.quantize_row(&validated)?;
        Ok((update, validated))
    }

    /// Drop everything accepted so far in the open group, plus
    /// `extra_rows` rows that never made it in.
    fn drop_open_group(&mut self, extra_rows: u64) {
        if let Some(group) = self.group.as_mut() {
            self.stats.rows_dropped += group.rows + extra_rows;
            self.stats.batches_dropped += 1;
            group.rows = 0;
            group.updates.clear();
            group.canonical.clear();
            group.skipping = true;
        }
    }

    fn close_group(&mut self) -> Result<Option<AssembledBatch>, PipelineError> {
        let Some(group) = self.group.take() else {
            return Ok(None);
        };
        if group.skipping || group.updates.is_empty() {
            return Ok(None);
        }

        if group.updates.len() > MAX_UPDATES_PER_BATCH {
            let err = PipelineError::schema_batch(format!(
                "timestamp group {} ({} us) has {} updates, more than {}",
                group.group_id,
                group.ts_us,
                group.updates.len(),
                MAX_UPDATES_PER_BATCH
            ));
            return match self.policy.on_error(err, QuarantineItem::batch(group.group_id)) {
                FailurePolicyDecision::Abort(e) => Err(e),
                _ => {
                    self.stats.rows_dropped += group.rows;
                    self.stats.batches_dropped += 1;
                    Ok(None)
                }
            };
        }

        let is_snapshot = group.is_snapshot.unwrap_or(false);
        let is_snapshot_reset = is_snapshot && !self.prev_emitted_snapshot;
        self.prev_emitted_snapshot = is_snapshot;
        self.stats.batches_emitted += 1;
        self.stats.rows_accepted += group.rows;

        debug!(
            group_id = group.group_id,
            ts_us = group.ts_us,
            updates = group.updates.len(),
            is_snapshot_reset,
            "batch assembled"
        );
        Ok(Some(AssembledBatch {
            group_id: group.group_id,
            batch: Batch::new(group.ts_us * NANOS_PER_MICRO, is_snapshot_reset, group.updates),
            row_count: group.rows,
            canonical_rows: group.canonical,
        }))
    }
}
