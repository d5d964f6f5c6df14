//! Pipeline Error Taxonomy
//!
//! One error type for both stages. Every variant carries a stable
//! `reason_code()` (written to quarantine records) and a `scope()` that the
//! Failure-Policy Controller uses to decide how much data a skip drops.
//!
//! Order rejections (`InsufficientLiquidity` and friends) are NOT errors;
//! they live in `replay::matching::RejectReason`.

use crate::common::types::{BatchId, Nanos, Ticks};
use std::path::PathBuf;

// =============================================================================
// ROW REFERENCE
// =============================================================================

/// Location of an input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowRef {
    /// 0-based index among data rows (header excluded).
    pub row_index: u64,
    /// 1-based line number in the source file.
    pub line_number: u64,
}

impl RowRef {
    pub fn new(row_index: u64, line_number: u64) -> Self {
        Self {
            row_index,
            line_number,
        }
    }
}

impl std::fmt::Display for RowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {} (line {})", self.row_index, self.line_number)
    }
}

// =============================================================================
// ERROR SCOPE
// =============================================================================

/// How much data an error invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// A single input row.
    Row,
    /// A whole batch (timestamp group).
    Batch,
    /// The whole run; never recoverable.
    Run,
}

// =============================================================================
// PIPELINE ERROR
// =============================================================================

#[derive(Debug)]
pub enum PipelineError {
    /// Structural problem in the input (missing field, bad enum, bad header).
    SchemaViolation {
        row: Option<RowRef>,
        scope: ErrorScope,
        detail: String,
    },
    /// A row's receive timestamp went backwards.
    NonMonotonicTimestamp {
        row: RowRef,
        previous_us: i64,
        current_us: i64,
    },
    /// A decimal value is not an exact multiple of its increment.
    QuantizationIndivisible {
        row: Option<RowRef>,
        field: &'static str,
        value: String,
        increment: String,
    },
    /// The source file changed between the start and the end of a compile.
    InputChangedDuringCompile {
        path: PathBuf,
        expected: String,
        observed: String,
    },
    /// `best_bid >= best_ask` after a batch was applied.
    CrossedBookDetected {
        batch_id: BatchId,
        ts_recv_ns: Nanos,
        best_bid: Ticks,
        best_ask: Ticks,
    },
    /// Index disagrees with the event log or the manifest.
    IndexMismatch { detail: String },
    /// Malformed binary record.
    DecodeError { offset: u64, detail: String },
    /// Configuration rejected before any data was processed.
    InvalidConfig { detail: String },
    /// Underlying I/O failure.
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Row-scoped schema violation.
    pub fn schema_row(row: RowRef, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            row: Some(row),
            scope: ErrorScope::Row,
            detail: detail.into(),
        }
    }

    /// Batch-scoped schema violation.
    pub fn schema_batch(detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            row: None,
            scope: ErrorScope::Batch,
            detail: detail.into(),
        }
    }

    /// Run-scoped schema violation (header, empty input, ...).
    pub fn schema_run(detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            row: None,
            scope: ErrorScope::Run,
            detail: detail.into(),
        }
    }

    pub fn decode(offset: u64, detail: impl Into<String>) -> Self {
        Self::DecodeError {
            offset,
            detail: detail.into(),
        }
    }

    pub fn index_mismatch(detail: impl Into<String>) -> Self {
        Self::IndexMismatch {
            detail: detail.into(),
        }
    }

    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable snake_case identifier used in quarantine records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "schema_violation",
            Self::NonMonotonicTimestamp { .. } => "non_monotonic_timestamp",
            Self::QuantizationIndivisible { .. } => "quantization_indivisible",
            Self::InputChangedDuringCompile { .. } => "input_changed_during_compile",
            Self::CrossedBookDetected { .. } => "crossed_book_detected",
            Self::IndexMismatch { .. } => "index_mismatch",
            Self::DecodeError { .. } => "decode_error",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Io { .. } => "io",
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::SchemaViolation { scope, .. } => *scope,
            Self::NonMonotonicTimestamp { .. } => ErrorScope::Row,
            Self::QuantizationIndivisible { row, .. } => {
                if row.is_some() {
                    ErrorScope::Row
                } else {
                    ErrorScope::Run
                }
            }
            Self::CrossedBookDetected { .. } => ErrorScope::Batch,
            Self::InputChangedDuringCompile { .. }
            | Self::IndexMismatch { .. }
            | Self::DecodeError { .. }
            | Self::InvalidConfig { .. }
            | Self::Io { .. } => ErrorScope::Run,
        }
    }

    /// Row the error refers to, if any.
    pub fn row(&self) -> Option<RowRef> {
        match self {
            Self::SchemaViolation { row, .. } => *row,
            Self::NonMonotonicTimestamp { row, .. } => Some(*row),
            Self::QuantizationIndivisible { row, .. } => *row,
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaViolation { row, detail, .. } => match row {
                Some(row) => write!(f, "schema violation at {}: {}", row, detail),
                None => write!(f, "schema violation: {}", detail),
            },
            Self::NonMonotonicTimestamp {
                row,
                previous_us,
                current_us,
            } => write!(
                f,
                "non-monotonic local_timestamp at {}: {} < {}",
                row, current_us, previous_us
            ),
            Self::QuantizationIndivisible {
                row,
                field,
                value,
                increment,
            } => {
                write!(
                    f,
                    "{} {} is not a multiple of increment {}",
                    field, value, increment
                )?;
                if let Some(row) = row {
                    write!(f, " at {}", row)?;
                }
                Ok(())
            }
            Self::InputChangedDuringCompile {
                path,
                expected,
                observed,
            } => write!(
                f,
                "input {} changed during compile (expected {}, observed {})",
                path.display(),
                expected,
                observed
            ),
            Self::CrossedBookDetected {
                batch_id,
                ts_recv_ns,
                best_bid,
                best_ask,
            } => write!(
                f,
                "crossed book after batch {} (ts {}): best_bid {} >= best_ask {}",
                batch_id, ts_recv_ns, best_bid, best_ask
            ),
            Self::IndexMismatch { detail } => write!(f, "index mismatch: {}", detail),
            Self::DecodeError { offset, detail } => {
                write!(f, "decode error at byte {}: {}", offset, detail)
            }
            Self::InvalidConfig { detail } => write!(f, "invalid config: {}", detail),
            Self::Io { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let err = PipelineError::schema_row(RowRef::new(3, 5), "bad side");
        assert_eq!(err.reason_code(), "schema_violation");
        assert_eq!(err.scope(), ErrorScope::Row);
        assert_eq!(err.row(), Some(RowRef::new(3, 5)));

        let err = PipelineError::CrossedBookDetected {
            batch_id: 7,
            ts_recv_ns: 1_000,
            best_bid: 105,
            best_ask: 100,
        };
        assert_eq!(err.reason_code(), "crossed_book_detected");
        assert_eq!(err.scope(), ErrorScope::Batch);
    }

    #[test]
    fn test_run_scoped_errors() {
        assert_eq!(PipelineError::schema_run("empty").scope(), ErrorScope::Run);
        assert_eq!(PipelineError::decode(0, "magic").scope(), ErrorScope::Run);
        assert_eq!(
            PipelineError::io("open", std::io::Error::from(std::io::ErrorKind::NotFound)).scope(),
            ErrorScope::Run
        );
    }

    #[test]
    fn test_display_mentions_row() {
        let err = PipelineError::QuantizationIndivisible {
            row: Some(RowRef::new(0, 2)),
            field: "price",
            value: "100.003".to_string(),
            increment: "0.01".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("100.003"));
        assert!(text.contains("line 2"));
    }
}
