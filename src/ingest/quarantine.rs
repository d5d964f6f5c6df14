//! Quarantine records and sinks.
//!
//! One JSON object per skipped row or batch:
//! `{row_index, line_number, batch_id, reason_code, detail, raw_fields}`.

use crate::common::errors::PipelineError;
use crate::common::types::BatchId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub row_index: Option<u64>,
    pub line_number: Option<u64>,
    pub batch_id: Option<BatchId>,
    pub reason_code: String,
    pub detail: String,
    pub raw_fields: BTreeMap<String, String>,
}

pub trait QuarantineSink {
    fn record(&mut self, record: &QuarantineRecord) -> Result<(), PipelineError>;

    fn flush(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl<S: QuarantineSink + ?Sized> QuarantineSink for Box<S> {
    fn record(&mut self, record: &QuarantineRecord) -> Result<(), PipelineError> {
        (**self).record(record)
    }

    fn flush(&mut self) -> Result<(), PipelineError> {
        (**self).flush()
    }
}

/// Line-delimited JSON sink.
pub struct JsonlQuarantineSink<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> JsonlQuarantineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(mut self) -> Result<W, PipelineError> {
        self.out
            .flush()
            .map_err(|e| PipelineError::io("flush quarantine", e))?;
        Ok(self.out)
    }
}

impl<W: Write> QuarantineSink for JsonlQuarantineSink<W> {
    fn record(&mut self, record: &QuarantineRecord) -> Result<(), PipelineError> {
        serde_json::to_writer(&mut self.out, record)
            .map_err(|e| PipelineError::io("write quarantine record", e.into()))?;
        self.out
            .write_all(b"\n")
            .map_err(|e| PipelineError::io("write quarantine record", e))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PipelineError> {
        self.out
            .flush()
            .map_err(|e| PipelineError::io("flush quarantine", e))
    }
}

/// In-memory sink, used by replay and tests.
#[derive(Debug, Default)]
pub struct MemoryQuarantineSink {
    records: Vec<QuarantineRecord>,
}

impl MemoryQuarantineSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[QuarantineRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<QuarantineRecord> {
        self.records
    }
}

impl QuarantineSink for MemoryQuarantineSink {
    fn record(&mut self, record: &QuarantineRecord) -> Result<(), PipelineError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Write `records` as JSONL to `path`, through a temporary file in the
/// same directory so a reader never sees a partial file.
pub fn write_quarantine_file(path: &Path, records: &[QuarantineRecord]) -> Result<u64, PipelineError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)
        .map_err(|e| PipelineError::io(format!("create temporary file in {}", dir.display()), e))?;
    let mut sink = JsonlQuarantineSink::new(BufWriter::new(temp));
    for record in records {
        sink.record(record)?;
    }
    let written = sink.written();
    let temp = sink
        .into_inner()?
        .into_inner()
        .map_err(|e| PipelineError::io("flush quarantine", e.into_error()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| PipelineError::io("sync quarantine", e))?;
    temp.persist(path)
        .map_err(|e| PipelineError::io(format!("persist {}", path.display()), e.error))?;
    Ok(written)
}

/// Parse a quarantine file written by `JsonlQuarantineSink`.
pub fn read_quarantine_jsonl(text: &str) -> Result<Vec<QuarantineRecord>, PipelineError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                PipelineError::decode(i as u64, format!("quarantine line {}: {}", i + 1, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> QuarantineRecord {
        QuarantineRecord {
            row_index: Some(2),
            line_number: Some(4),
            batch_id: Some(1),
            reason_code: "quantization_indivisible".to_string(),
            detail: "price 100.003 is not a multiple of increment 0.01".to_string(),
            raw_fields: BTreeMap::from([("price".to_string(), "100.003".to_string())]),
        }
    }

    #[test]
    fn test_jsonl_sink_one_line_per_record() {
        let mut sink = JsonlQuarantineSink::new(Vec::new());
        sink.record(&record()).unwrap();
        sink.record(&record()).unwrap();
        assert_eq!(sink.written(), 2);
        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        let parsed = read_quarantine_jsonl(&text).unwrap();
        assert_eq!(parsed, vec![record(), record()]);
        assert!(text.contains("\"reason_code\":\"quantization_indivisible\""));
    }

    #[test]
    fn test_write_quarantine_file_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.replay.quarantine.jsonl");
        std::fs::write(&path, "stale\n").unwrap();

        assert_eq!(write_quarantine_file(&path, &[record()]).unwrap(), 1);
        let parsed = read_quarantine_jsonl(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, vec![record()]);

        assert_eq!(write_quarantine_file(&path, &[]).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        // Only the final file remains, no temporaries.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_boxed_memory_sink() {
        let mut sink: Box<dyn QuarantineSink> = Box::new(MemoryQuarantineSink::new());
        sink.record(&record()).unwrap();
        sink.flush().unwrap();
    }
}
