//! Event Log Writer
//!
//! Appends batches to any `Write` sink, hashing every byte written (the
//! output hash) and recording one index entry per batch. Batches must
//! arrive in strictly increasing receive-time order.

use crate::common::errors::PipelineError;
use crate::common::hashing::HashingWriter;
use crate::common::types::Nanos;
use crate::evlog::format::{encode_batch, encode_header, Batch, EvlogHeader};
use crate::evlog::index::{EventIndex, IndexEntry};
use std::io::Write;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WriterSummary {
    pub header: EvlogHeader,
    pub batch_count: u64,
    pub update_count: u64,
    pub bytes_written: u64,
    pub output_hash: String,
    pub index: EventIndex,
    pub first_ts_ns: Option<Nanos>,
    pub last_ts_ns: Option<Nanos>,
}

pub struct EventLogWriter<W: Write> {
    out: HashingWriter<W>,
    header: EvlogHeader,
    index: EventIndex,
    batch_count: u64,
    update_count: u64,
    first_ts_ns: Option<Nanos>,
    last_ts_ns: Option<Nanos>,
    scratch: Vec<u8>,
}

impl<W: Write> EventLogWriter<W> {
    /// Write the header and return a writer positioned at the first batch.
    pub fn new(inner: W, header: EvlogHeader) -> Result<Self, PipelineError> {
        let mut out = HashingWriter::new(inner);
        let mut scratch = Vec::with_capacity(4096);
        encode_header(&header, &mut scratch);
        out.write_all(&scratch)
            .map_err(|e| PipelineError::io("write event log header", e))?;
        scratch.clear();
        Ok(Self {
            out,
            header,
            index: EventIndex::new(),
            batch_count: 0,
            update_count: 0,
            first_ts_ns: None,
            last_ts_ns: None,
            scratch,
        })
    }

    pub fn header(&self) -> &EvlogHeader {
        &self.header
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    /// Append one batch; returns its byte offset.
    pub fn write_batch(&mut self, batch: &Batch) -> Result<u64, PipelineError> {
        if let Some(last) = self.last_ts_ns {
            if batch.ts_recv_ns <= last {
                return Err(PipelineError::schema_run(format!(
                    "batch ts {} does not follow previous batch ts {}",
                    batch.ts_recv_ns, last
                )));
            }
        }

        // Encode fully before touching the sink so a rejected batch leaves
        // the stream unchanged.
        self.scratch.clear();
        encode_batch(batch, &mut self.scratch)?;

        let offset = self.out.bytes_written();
        self.out
            .write_all(&self.scratch)
            .map_err(|e| PipelineError::io("write event log batch", e))?;
        self.index.push(IndexEntry {
            ts_recv_ns: batch.ts_recv_ns,
            byte_offset: offset,
        })?;

        self.batch_count += 1;
        self.update_count += batch.updates.len() as u64;
        self.first_ts_ns.get_or_insert(batch.ts_recv_ns);
        self.last_ts_ns = Some(batch.ts_recv_ns);

        debug!(
            ts_recv_ns = batch.ts_recv_ns,
            updates = batch.updates.len(),
            offset,
            "batch written"
        );
        Ok(offset)
    }

    /// Flush and return the sink together with counts, hash and index.
    pub fn finish(self) -> Result<(W, WriterSummary), PipelineError> {
        let (inner, bytes_written, output_hash) = self
            .out
            .finish()
            .map_err(|e| PipelineError::io("flush event log", e))?;
        Ok((
            inner,
            WriterSummary {
                header: self.header,
                batch_count: self.batch_count,
                update_count: self.update_count,
                bytes_written,
                output_hash,
                index: self.index,
                first_ts_ns: self.first_ts_ns,
                last_ts_ns: self.last_ts_ns,
            },
        ))
    }
}

/// Encode a complete artifact in memory.
pub fn encode_event_log(header: EvlogHeader, batches: &[Batch]) -> Result<(Vec<u8>, WriterSummary), PipelineError> {
    let mut writer = EventLogWriter::new(Vec::new(), header)?;
    for batch in batches {
        writer.write_batch(batch)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::hashing::sha256_hex;
    use crate::common::types::Side;
    use crate::evlog::format::{LevelUpdate, FORMAT_VERSION, HEADER_LEN};

    fn header() -> EvlogHeader {
        EvlogHeader {
            version: FORMAT_VERSION,
            price_increment_fixed64: 10_000_000_000,
            amount_increment_fixed64: 1_000_000_000,
        }
    }

    #[test]
    fn test_offsets_and_hash() {
        let b1 = Batch::new(100, true, vec![LevelUpdate::new(Side::Bid, 10, 1)]);
        let b2 = Batch::new(200, false, vec![]);
        let (bytes, summary) = encode_event_log(header(), &[b1.clone(), b2]).unwrap();

        assert_eq!(summary.batch_count, 2);
        assert_eq!(summary.update_count, 1);
        assert_eq!(summary.bytes_written, bytes.len() as u64);
        assert_eq!(summary.output_hash, sha256_hex(&bytes));
        let entries = summary.index.entries();
        assert_eq!(entries[0].byte_offset, HEADER_LEN as u64);
        assert_eq!(entries[1].byte_offset, (HEADER_LEN + b1.encoded_len()) as u64);
        assert_eq!(summary.first_ts_ns, Some(100));
        assert_eq!(summary.last_ts_ns, Some(200));
    }

    #[test]
    fn test_rejects_non_increasing_batches() {
        let mut writer = EventLogWriter::new(Vec::new(), header()).unwrap();
        writer.write_batch(&Batch::new(100, false, vec![])).unwrap();
        assert!(writer.write_batch(&Batch::new(100, false, vec![])).is_err());
        assert!(writer.write_batch(&Batch::new(50, false, vec![])).is_err());
        assert_eq!(writer.batch_count(), 1);
    }

    #[test]
    fn test_empty_log_is_header_only() {
        let (bytes, summary) = encode_event_log(header(), &[]).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(summary.index.is_empty());
    }
}
