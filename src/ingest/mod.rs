//! CSV Ingestion and Compilation
//!
//! ```text
//! CsvRowSource ─► SchemaValidator ─► Quantizer ─► BatchAssembler ─► EventLogWriter
//!                        │               │              │
//!                        └───────────────┴──────────────┴─► FailurePolicyController ─► QuarantineSink
//! ```
//!
//! - Rows are processed strictly in file order, single-threaded.
//! - A decreasing `local_timestamp` is an error; rows are never reordered.
//! - Prices and amounts are converted exactly or rejected.
//! - `compile` stages everything in temporaries and promotes atomically.

pub mod batcher;
pub mod compiler;
pub mod csv_source;
pub mod failure_policy;
pub mod increments;
pub mod instrument_meta;
pub mod quantizer;
pub mod quarantine;
pub mod validation;


pub use batcher::{AssembledBatch, AssemblerStats, BatchAssembler};
pub use compiler::{compile, CompileOutcome};
pub use csv_source::{CsvRowSource, RawRow, TARDIS_L2_COLUMNS};
pub use failure_policy::{FailurePolicyController, FailurePolicyDecision, QuarantineItem};
pub use increments::infer_increments;
pub use instrument_meta::{InstrumentMeta, StaticInstrumentMeta};
pub use quantizer::Quantizer;
pub use quarantine::{
    read_quarantine_jsonl, write_quarantine_file, JsonlQuarantineSink, MemoryQuarantineSink,
    QuarantineRecord, QuarantineSink,
};
pub use validation::{SchemaValidator, ValidatedRow};
