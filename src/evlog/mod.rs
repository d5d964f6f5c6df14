//! Binary Event Log
//!
//! A compiled artifact is three files sharing one prefix:
//!
//! ```text
//! {prefix}.evlog          header + batches (see `format`)
//! {prefix}.idx            (ts_recv_ns, byte_offset) per batch
//! {prefix}.manifest.json  hashes, counts, instrument, provenance
//! ```
//!
//! `EventLogWriter` produces the log and index in one pass; `EventLogReader`
//! streams batches back and can seek through the index. `verify_artifact`
//! recomputes every hash and cross-checks the three files.

pub mod format;
pub mod index;
pub mod manifest;
pub mod reader;
pub mod verify;
pub mod writer;

#[cfg(test)]
mod evlog_tests;

pub use format::{Batch, EvlogHeader, LevelUpdate, FORMAT_VERSION};
pub use index::{EventIndex, IndexEntry};
pub use manifest::{ArtifactPaths, Manifest};
pub use reader::{decode_event_log, EventLogReader};
pub use verify::{verify_artifact, VerifyReport};
pub use writer::{encode_event_log, EventLogWriter, WriterSummary};
