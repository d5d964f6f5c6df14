//! Event Log Reader
//!
//! Lazy, restartable, forward-only stream of `(BatchId, Batch)` pairs.
//! With an index loaded, `seek_time` jumps straight to the first batch at
//! or after a timestamp; without one it scans from the start.

use crate::common::errors::PipelineError;
use crate::common::instrument::Instrument;
use crate::common::types::{BatchId, Nanos};
use crate::evlog::format::{
    decode_batch_header, decode_header, decode_update, Batch, EvlogHeader, BATCH_HEADER_LEN,
    HEADER_LEN, UPDATE_LEN,
};
use crate::evlog::index::EventIndex;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

pub struct EventLogReader<R: Read + Seek> {
    inner: R,
    header: EvlogHeader,
    instrument: Instrument,
    index: Option<EventIndex>,
    log_len: u64,
    position: u64,
    next_batch_id: BatchId,
    last_ts_ns: Option<Nanos>,
    /// Timestamp the next batch must carry (set by an index seek).
    expected_ts_ns: Option<Nanos>,
    failed: bool,
}

impl EventLogReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::io(format!("open event log {}", path.display()), e))?;
        Self::new(BufReader::new(file))
    }

    pub fn open_with_index(path: &Path, index_path: &Path) -> Result<Self, PipelineError> {
        let index = EventIndex::load(index_path)?;
        Self::open(path)?.with_index(index)
    }
}

impl<R: Read + Seek> EventLogReader<R> {
    /// Read and validate the header; the reader is left at the first batch.
    pub fn new(mut inner: R) -> Result<Self, PipelineError> {
        let log_len = inner
            .seek(SeekFrom::End(0))
            .map_err(|e| PipelineError::io("measure event log", e))?;
        inner
            .seek(SeekFrom::Start(0))
            .map_err(|e| PipelineError::io("rewind event log", e))?;

        let mut buf = [0u8; HEADER_LEN];
        let n = read_full(&mut inner, &mut buf)?;
        if n < HEADER_LEN {
            return Err(PipelineError::decode(
                n as u64,
                format!("short header: {} of {} bytes", n, HEADER_LEN),
            ));
        }
        let header = decode_header(&buf)?;
        let instrument = header.instrument()?;

        Ok(Self {
            inner,
            header,
            instrument,
            index: None,
            log_len,
            position: HEADER_LEN as u64,
            next_batch_id: 0,
            last_ts_ns: None,
            expected_ts_ns: None,
            failed: false,
        })
    }

    /// Attach an index after checking it fits this log.
    pub fn with_index(mut self, index: EventIndex) -> Result<Self, PipelineError> {
        index.validate_against_log(self.log_len)?;
        self.index = Some(index);
        Ok(self)
    }

    pub fn header(&self) -> &EvlogHeader {
        &self.header
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn index(&self) -> Option<&EventIndex> {
        self.index.as_ref()
    }

    pub fn log_len(&self) -> u64 {
        self.log_len
    }

    /// Byte offset of the next record.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Id the next yielded batch will carry.
    pub fn next_batch_id(&self) -> BatchId {
        self.next_batch_id
    }

    /// Restart from the first batch.
    pub fn rewind(&mut self) -> Result<(), PipelineError> {
        self.set_position(HEADER_LEN as u64, 0)?;
        self.last_ts_ns = None;
        self.expected_ts_ns = None;
        self.failed = false;
        Ok(())
    }

    /// Position the reader at the first batch with `ts_recv_ns >= ts`.
    /// Past the last batch the reader is left at end of stream.
    pub fn seek_time(&mut self, ts: Nanos) -> Result<(), PipelineError> {
        self.failed = false;
        self.expected_ts_ns = None;

        if let Some(index) = &self.index {
            let pos = index.locate(ts);
            let target = index.entries().get(pos).copied();
            match target {
                Some(entry) => {
                    self.set_position(entry.byte_offset, pos as BatchId)?;
                    self.expected_ts_ns = Some(entry.ts_recv_ns);
                }
                None => {
                    let end = self.log_len;
                    self.set_position(end, pos as BatchId)?;
                }
            }
            self.last_ts_ns = None;
            return Ok(());
        }

        self.rewind()?;
        loop {
            let offset = self.position;
            let previous_ts = self.last_ts_ns;
            match self.next_batch()? {
                None => return Ok(()),
                Some((batch_id, batch)) => {
                    if batch.ts_recv_ns >= ts {
                        self.set_position(offset, batch_id)?;
                        self.last_ts_ns = previous_ts;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn set_position(&mut self, offset: u64, batch_id: BatchId) -> Result<(), PipelineError> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| PipelineError::io("seek event log", e))?;
        self.position = offset;
        self.next_batch_id = batch_id;
        Ok(())
    }

    /// Decode the next batch, or `None` at a clean end of stream.
    pub fn next_batch(&mut self) -> Result<Option<(BatchId, Batch)>, PipelineError> {
        let start = self.position;
        let mut head = [0u8; BATCH_HEADER_LEN];
        let n = read_full(&mut self.inner, &mut head)?;
        if n == 0 {
            return Ok(None);
        }
        if n < BATCH_HEADER_LEN {
            return Err(PipelineError::decode(
                start,
                format!("short batch header: {} of {} bytes", n, BATCH_HEADER_LEN),
            ));
        }
        let batch_header = decode_batch_header(&head, start)?;
        self.position += BATCH_HEADER_LEN as u64;

        let count = batch_header.update_count as usize;
        let mut updates = Vec::with_capacity(count);
        let mut raw = [0u8; UPDATE_LEN];
        for i in 0..count {
            let n = read_full(&mut self.inner, &mut raw)?;
            if n < UPDATE_LEN {
                return Err(PipelineError::decode(
                    self.position,
                    format!(
                        "batch at byte {} declares {} updates but ends after {}",
                        start, count, i
                    ),
                ));
            }
            updates.push(decode_update(&raw, self.position)?);
            self.position += UPDATE_LEN as u64;
        }

        if let Some(expected) = self.expected_ts_ns.take() {
            if expected != batch_header.ts_recv_ns {
                return Err(PipelineError::index_mismatch(format!(
                    "index entry at byte {} says ts {}, batch has {}",
                    start, expected, batch_header.ts_recv_ns
                )));
            }
        }
        if let Some(last) = self.last_ts_ns {
            if batch_header.ts_recv_ns <= last {
                return Err(PipelineError::decode(
                    start,
                    format!(
                        "batch ts {} does not follow previous batch ts {}",
                        batch_header.ts_recv_ns, last
                    ),
                ));
            }
        }
        self.last_ts_ns = Some(batch_header.ts_recv_ns);

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        Ok(Some((
            batch_id,
            Batch {
                ts_recv_ns: batch_header.ts_recv_ns,
                is_snapshot_reset: batch_header.is_snapshot_reset,
                updates,
            },
        )))
    }
}

impl<R: Read + Seek> Iterator for EventLogReader<R> {
    type Item = Result<(BatchId, Batch), PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_batch() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the stream allows; returns the byte count read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, PipelineError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(PipelineError::io("read event log", e)),
        }
    }
    Ok(filled)
}

/// Decode every batch of an in-memory artifact.
pub fn decode_event_log(bytes: &[u8]) -> Result<(EvlogHeader, Vec<Batch>), PipelineError> {
    let reader = EventLogReader::new(std::io::Cursor::new(bytes))?;
    let header = *reader.header();
    let batches = reader
        .map(|item| item.map(|(_, batch)| batch))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((header, batches))
}
