//! Shared building blocks: integer domain types, the error taxonomy,
//! instrument increments, configuration and hashing.

pub mod config;
pub mod errors;
pub mod hashing;
pub mod instrument;
pub mod types;

pub use config::{
    load_from_path, CompileConfig, FailureMode, FailurePolicyConfig, InstrumentSource,
    InstrumentSpec, MarkPolicy, QuarantineGranularity, ReplayConfig, StrategyConfig,
};
pub use errors::{ErrorScope, PipelineError, RowRef};
pub use hashing::{sha256_hex, FileFingerprint, HashingWriter};
pub use instrument::{parse_decimal, Instrument, FIXED64_SCALE};
pub use types::*;
