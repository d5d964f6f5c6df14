//! Batch index: one `(ts_recv_ns, byte_offset)` pair per batch.
//!
//! ```text
//! magic "L2IX" (4B) | version u16 | { ts_recv_ns i64 | byte_offset u64 }*
//! ```

use crate::common::errors::PipelineError;
use crate::common::types::Nanos;
use crate::evlog::format::HEADER_LEN;
use std::io::Write;
use std::path::Path;

pub const INDEX_MAGIC: [u8; 4] = *b"L2IX";
pub const INDEX_VERSION: u16 = 1;
pub const INDEX_HEADER_LEN: usize = 4 + 2;
pub const INDEX_ENTRY_LEN: usize = 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub ts_recv_ns: Nanos,
    pub byte_offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventIndex {
    entries: Vec<IndexEntry>,
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; both fields must strictly increase.
    pub fn push(&mut self, entry: IndexEntry) -> Result<(), PipelineError> {
        if let Some(last) = self.entries.last() {
            if entry.ts_recv_ns <= last.ts_recv_ns || entry.byte_offset <= last.byte_offset {
                return Err(PipelineError::index_mismatch(format!(
                    "entry {} ({}, {}) does not follow ({}, {})",
                    self.entries.len(),
                    entry.ts_recv_ns,
                    entry.byte_offset,
                    last.ts_recv_ns,
                    last.byte_offset
                )));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the first entry with `ts_recv_ns >= ts`
    /// (equals `len()` when every batch is earlier).
    pub fn locate(&self, ts: Nanos) -> usize {
        self.entries.partition_point(|e| e.ts_recv_ns < ts)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INDEX_HEADER_LEN + self.entries.len() * INDEX_ENTRY_LEN);
        out.extend_from_slice(&INDEX_MAGIC);
        out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.ts_recv_ns.to_le_bytes());
            out.extend_from_slice(&entry.byte_offset.to_le_bytes());
        }
        out
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&self.encode())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.len() < INDEX_HEADER_LEN || bytes[..4] != INDEX_MAGIC {
            return Err(PipelineError::index_mismatch("bad index magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != INDEX_VERSION {
            return Err(PipelineError::index_mismatch(format!(
                "unsupported index version {}",
                version
            )));
        }
        let body = &bytes[INDEX_HEADER_LEN..];
        if body.len() % INDEX_ENTRY_LEN != 0 {
            return Err(PipelineError::index_mismatch(format!(
                "index body of {} bytes is not a whole number of entries",
                body.len()
            )));
        }
        let mut index = Self::new();
        for chunk in body.chunks_exact(INDEX_ENTRY_LEN) {
            let mut ts = [0u8; 8];
            let mut off = [0u8; 8];
            ts.copy_from_slice(&chunk[..8]);
            off.copy_from_slice(&chunk[8..]);
            index.push(IndexEntry {
                ts_recv_ns: i64::from_le_bytes(ts),
                byte_offset: u64::from_le_bytes(off),
            })?;
        }
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path)
            .map_err(|e| PipelineError::io(format!("read index {}", path.display()), e))?;
        Self::decode(&bytes)
    }

    /// Check the entries against the length of the event log they describe.
    pub fn validate_against_log(&self, log_len: u64) -> Result<(), PipelineError> {
        if let Some(first) = self.entries.first() {
            if first.byte_offset != HEADER_LEN as u64 {
                return Err(PipelineError::index_mismatch(format!(
                    "first batch offset {} != header length {}",
                    first.byte_offset, HEADER_LEN
                )));
            }
        }
        if let Some(last) = self.entries.last() {
            if last.byte_offset >= log_len {
                return Err(PipelineError::index_mismatch(format!(
                    "offset {} outside event log of {} bytes",
                    last.byte_offset, log_len
                )));
            }
        }
        Ok(())
    }

    /// One entry per batch: the count must equal the manifest's `batch_count`.
    pub fn validate_batch_count(&self, batch_count: u64) -> Result<(), PipelineError> {
        if self.entries.len() as u64 != batch_count {
            return Err(PipelineError::index_mismatch(format!(
                "index has {} entries, manifest batch_count is {}",
                self.entries.len(),
                batch_count
            )));
        }
        Ok(())
    }
}
