//! Failure-Policy Controller
//!
//! Turns an error into an explicit `FailurePolicyDecision` that the caller
//! interprets. The controller never repairs data; in quarantine mode it
//! records the offending item before telling the caller what to drop.
//!
//! | mode / granularity          | row error | batch error | run error |
//! |-----------------------------|-----------|-------------|-----------|
//! | hard_fail                   | Abort     | Abort       | Abort     |
//! | quarantine skip_row         | SkipRow   | SkipBatch   | Abort     |
//! | quarantine skip_batch       | SkipBatch | SkipBatch   | Abort     |
//! | quarantine halt_after_errors| SkipRow   | SkipBatch   | Abort     |
//!
//! `halt_after_errors` aborts on the `max_errors`-th record.

use crate::common::config::{FailureMode, FailurePolicyConfig, QuarantineGranularity};
use crate::common::errors::{ErrorScope, PipelineError, RowRef};
use crate::common::types::BatchId;
use crate::ingest::quarantine::{QuarantineRecord, QuarantineSink};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug)]
pub enum FailurePolicyDecision {
    /// Item accepted.
    Continue,
    /// Drop the offending row only.
    SkipRow,
    /// Drop every row of the offending batch.
    SkipBatch,
    /// Stop the run with this error.
    Abort(PipelineError),
}

/// What a quarantine record should point at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuarantineItem {
    pub row: Option<RowRef>,
    pub batch_id: Option<BatchId>,
    pub raw_fields: BTreeMap<String, String>,
}

impl QuarantineItem {
    pub fn row(row: RowRef, batch_id: Option<BatchId>, raw_fields: BTreeMap<String, String>) -> Self {
        Self {
            row: Some(row),
            batch_id,
            raw_fields,
        }
    }

    pub fn batch(batch_id: BatchId) -> Self {
        Self {
            row: None,
            batch_id: Some(batch_id),
            raw_fields: BTreeMap::new(),
        }
    }
}

pub struct FailurePolicyController<S: QuarantineSink> {
    config: FailurePolicyConfig,
    sink: Option<S>,
    recorded: u64,
}

impl<S: QuarantineSink> FailurePolicyController<S> {
    /// Quarantine mode requires a sink; hard-fail mode ignores it.
    pub fn new(config: FailurePolicyConfig, sink: Option<S>) -> Result<Self, PipelineError> {
        config.validate()?;
        if config.is_quarantine() && sink.is_none() {
            return Err(PipelineError::invalid_config(
                "quarantine mode needs a quarantine sink",
            ));
        }
        Ok(Self {
            config,
            sink,
            recorded: 0,
        })
    }

    pub fn config(&self) -> &FailurePolicyConfig {
        &self.config
    }

    /// Number of quarantine records written so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    pub fn into_sink(self) -> Option<S> {
        self.sink
    }

    /// `Continue` for `Ok`, otherwise the decision for the error.
    pub fn admit(&mut self, outcome: Result<(), PipelineError>, item: QuarantineItem) -> FailurePolicyDecision {
        match outcome {
            Ok(()) => FailurePolicyDecision::Continue,
            Err(error) => self.on_error(error, item),
        }
    }

    pub fn on_error(&mut self, error: PipelineError, item: QuarantineItem) -> FailurePolicyDecision {
        let scope = error.scope();
        if self.config.mode == FailureMode::HardFail || scope == ErrorScope::Run {
            return FailurePolicyDecision::Abort(error);
        }
        let Some(sink) = self.sink.as_mut() else {
            return FailurePolicyDecision::Abort(error);
        };

        let record = QuarantineRecord {
            row_index: item.row.map(|r| r.row_index),
            line_number: item.row.map(|r| r.line_number),
            batch_id: item.batch_id,
            reason_code: error.reason_code().to_string(),
            detail: error.to_string(),
            raw_fields: item.raw_fields,
        };
        if let Err(sink_error) = sink.record(&record) {
            return FailurePolicyDecision::Abort(sink_error);
        }
        self.recorded += 1;
        warn!(
            reason = error.reason_code(),
            row_index = ?record.row_index,
            batch_id = ?record.batch_id,
            quarantined = self.recorded,
            "quarantined: {}",
            error
        );

        let natural = match scope {
            ErrorScope::Row => FailurePolicyDecision::SkipRow,
            _ => FailurePolicyDecision::SkipBatch,
        };
        match self.config.granularity {
            QuarantineGranularity::SkipRow => natural,
            QuarantineGranularity::SkipBatch => FailurePolicyDecision::SkipBatch,
            QuarantineGranularity::HaltAfterErrors => {
                if self.recorded >= self.config.max_errors {
                    FailurePolicyDecision::Abort(error)
                } else {
                    natural
                }
            }
        }
    }
}
