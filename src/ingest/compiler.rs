//! Compiler: CSV → event log + index + manifest.
//!
//! Every output is first written to a temporary file in the output
//! directory and only persisted to its final name once the whole compile
//! has succeeded (manifest last). Any error drops the temporaries, so a
//! failed compile never leaves an artifact at a final path. In quarantine
//! mode the quarantine file is persisted on success and on abort.

use crate::common::config::{CompileConfig, InstrumentSource};
use crate::common::errors::PipelineError;
use crate::common::hashing::{finish_hex, sha256_hex, FileFingerprint};
use crate::common::instrument::Instrument;
use crate::common::types::NANOS_PER_SEC;
use crate::evlog::format::EvlogHeader;
use crate::evlog::manifest::{ArtifactPaths, Manifest};
use crate::evlog::writer::EventLogWriter;
use crate::ingest::batcher::{AssembledBatch, AssemblerStats, BatchAssembler};
use crate::ingest::csv_source::{Column, CsvRowSource};
use crate::ingest::failure_policy::FailurePolicyController;
use crate::ingest::increments::infer_increments;
use crate::ingest::instrument_meta::{validate_date, StaticInstrumentMeta};
use crate::ingest::quantizer::Quantizer;
use crate::ingest::quarantine::{JsonlQuarantineSink, QuarantineSink};
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{info, warn};

type QuarantineFile = JsonlQuarantineSink<BufWriter<NamedTempFile>>;

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub paths: ArtifactPaths,
    pub manifest: Manifest,
    pub stats: AssemblerStats,
}

/// Exchange, symbol and date the artifact is labelled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    pub exchange: String,
    pub symbol: String,
    pub date: String,
}

struct StagedArtifact {
    evlog: NamedTempFile,
    index: NamedTempFile,
    manifest_file: NamedTempFile,
    manifest: Manifest,
    stats: AssemblerStats,
}

/// UTC calendar date of a microsecond timestamp.
pub fn utc_date_of_micros(ts_us: i64) -> Result<String, PipelineError> {
    let micros_per_sec = NANOS_PER_SEC / 1_000;
    let secs = ts_us.div_euclid(micros_per_sec);
    let nanos = (ts_us.rem_euclid(micros_per_sec) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .ok_or_else(|| PipelineError::schema_run(format!("timestamp {} us has no UTC date", ts_us)))
}

/// Resolve exchange/symbol/date from config overrides, falling back to
/// the first row that carries all three.
pub fn resolve_identity(input: &Path, config: &CompileConfig) -> Result<ArtifactIdentity, PipelineError> {
    if let (Some(exchange), Some(symbol), Some(date)) = (&config.exchange, &config.symbol, &config.date) {
        validate_date(date)?;
        return Ok(ArtifactIdentity {
            exchange: exchange.clone(),
            symbol: symbol.clone(),
            date: date.clone(),
        });
    }

    let mut first = None;
    for row in CsvRowSource::open(input)? {
        let Ok(row) = row else { continue };
        let exchange = row.field(Column::Exchange).unwrap_or("");
        let symbol = row.field(Column::Symbol).unwrap_or("");
        let ts = row.field(Column::LocalTimestamp).and_then(|t| t.parse::<i64>().ok());
        if let (false, false, Some(ts)) = (exchange.is_empty(), symbol.is_empty(), ts) {
            first = Some((exchange.to_string(), symbol.to_string(), ts));
            break;
        }
    }
    let (exchange, symbol, ts_us) =
        first.ok_or_else(|| PipelineError::schema_run("input has no readable data rows"))?;

    let date = match &config.date {
        Some(date) => {
            validate_date(date)?;
            date.clone()
        }
        None => utc_date_of_micros(ts_us)?,
    };
    Ok(ArtifactIdentity {
        exchange: config.exchange.clone().unwrap_or(exchange),
        symbol: config.symbol.clone().unwrap_or(symbol),
        date,
    })
}

pub fn resolve_instrument(
    input: &Path,
    config: &CompileConfig,
    identity: &ArtifactIdentity,
) -> Result<Instrument, PipelineError> {
    match &config.instrument {
        InstrumentSource::Explicit(spec) => spec.to_instrument(),
        InstrumentSource::StaticMetadata { path } => StaticInstrumentMeta::load(path)?
            .get(&identity.exchange, &identity.symbol, &identity.date)?
            .instrument(),
        InstrumentSource::Inferred => infer_increments(input),
    }
}

/// Compile `input` into `{output_dir}/{prefix}.*`.
pub fn compile(input: &Path, output_dir: &Path, config: &CompileConfig) -> Result<CompileOutcome, PipelineError> {
    compile_with_hook(input, output_dir, config, |_| {})
}

/// [`compile`] with a callback run after the log and index are staged and
/// before the input is re-fingerprinted.
pub(crate) fn compile_with_hook(
    input: &Path,
    output_dir: &Path,
    config: &CompileConfig,
    before_seal: impl FnOnce(&Path),
) -> Result<CompileOutcome, PipelineError> {
    config.failure_policy.validate()?;
    let started = Instant::now();

    let fingerprint = FileFingerprint::capture(input)?;
    let identity = resolve_identity(input, config)?;
    let instrument = resolve_instrument(input, config, &identity)?;
    let prefix = config.output_prefix.clone().unwrap_or_else(|| {
        format!("{}_{}_{}", identity.exchange, identity.symbol, identity.date)
    });

    std::fs::create_dir_all(output_dir)
        .map_err(|e| PipelineError::io(format!("create {}", output_dir.display()), e))?;
    let paths = ArtifactPaths::new(output_dir, &prefix);

    info!(
        input = %input.display(),
        output = %paths.evlog.display(),
        price_increment = %instrument.price_increment(),
        amount_increment = %instrument.amount_increment(),
        mode = ?config.failure_policy.mode,
        "compile started"
    );

    let sink = if config.failure_policy.is_quarantine() {
        Some(JsonlQuarantineSink::new(BufWriter::new(temp_in(output_dir)?)))
    } else {
        None
    };
    let mut policy = FailurePolicyController::new(config.failure_policy, sink)?;

    let staged = stage_artifact(
        input,
        output_dir,
        instrument,
        &identity,
        &fingerprint,
        &mut policy,
        before_seal,
    );

    let quarantined = policy.recorded();
    if let Some(sink) = policy.into_sink() {
        promote_quarantine(sink, &paths)?;
    }

    let staged = match staged {
        Ok(staged) => staged,
        Err(e) => {
            warn!(error = %e, quarantined, "compile aborted, no artifact written");
            return Err(e);
        }
    };

    promote_artifact(staged.evlog, staged.index, staged.manifest_file, &paths)?;

    info!(
        rows = staged.manifest.row_count,
        batches = staged.manifest.batch_count,
        quarantined = staged.manifest.quarantine_count,
        output_hash = %staged.manifest.output_hash,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "compile finished"
    );
    Ok(CompileOutcome {
        paths,
        manifest: staged.manifest,
        stats: staged.stats,
    })
}

fn stage_artifact(
    input: &Path,
    output_dir: &Path,
    instrument: Instrument,
    identity: &ArtifactIdentity,
    fingerprint: &FileFingerprint,
    policy: &mut FailurePolicyController<QuarantineFile>,
    before_seal: impl FnOnce(&Path),
) -> Result<StagedArtifact, PipelineError> {
    let mut source = CsvRowSource::open(input)?;
    let mut writer = EventLogWriter::new(
        BufWriter::new(temp_in(output_dir)?),
        EvlogHeader::for_instrument(&instrument),
    )?;
    let mut input_hasher = Sha256::new();
    let mut row_count = 0u64;

    let mut emit = |assembled: AssembledBatch| -> Result<(), PipelineError> {
        writer.write_batch(&assembled.batch)?;
        input_hasher.update(&assembled.canonical_rows);
        row_count += assembled.row_count;
        Ok(())
    };

    let mut assembler = BatchAssembler::new(Quantizer::new(instrument), policy);
    while let Some(row) = source.next_row() {
        match row {
            Ok(row) => {
                if let Some(done) = assembler.push_row(row)? {
                    emit(done)?;
                }
            }
            Err(e) => assembler.push_unreadable(e)?,
        }
    }
    if let Some(done) = assembler.finish()? {
        emit(done)?;
    }
    let stats = assembler.stats();
    drop(assembler);

    if stats.batches_emitted == 0 {
        return Err(PipelineError::schema_run(format!(
            "no rows accepted out of {}",
            stats.rows_seen
        )));
    }

    let (buffered, summary) = writer.finish()?;
    let evlog = unbuffer(buffered)?;

    let index_bytes = summary.index.encode();
    let mut index = temp_in(output_dir)?;
    index
        .write_all(&index_bytes)
        .map_err(|e| PipelineError::io("write index", e))?;
    sync(&index)?;

    before_seal(input);
    check_input_unchanged(input, fingerprint)?;

    let manifest = Manifest {
        format_version: summary.header.version,
        input_hash: finish_hex(input_hasher),
        output_hash: summary.output_hash,
        index_hash: sha256_hex(&index_bytes),
        source_sha256: fingerprint.sha256.clone(),
        source_size: fingerprint.size,
        price_increment: instrument.price_increment().to_string(),
        amount_increment: instrument.amount_increment().to_string(),
        exchange: identity.exchange.clone(),
        symbol: identity.symbol.clone(),
        date: identity.date.clone(),
        row_count,
        batch_count: summary.batch_count,
        update_count: summary.update_count,
        quarantine_count: policy.recorded(),
        first_ts_ns: summary.first_ts_ns,
        last_ts_ns: summary.last_ts_ns,
        compiler_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let mut manifest_file = temp_in(output_dir)?;
    manifest_file
        .write_all(&manifest.to_json_bytes()?)
        .map_err(|e| PipelineError::io("write manifest", e))?;
    sync(&manifest_file)?;

    Ok(StagedArtifact {
        evlog,
        index,
        manifest_file,
        manifest,
        stats,
    })
}

/// Fails when `input` no longer matches the fingerprint taken at start.
fn check_input_unchanged(input: &Path, fingerprint: &FileFingerprint) -> Result<(), PipelineError> {
    let observed = FileFingerprint::capture(input)?;
    if observed != *fingerprint {
        return Err(PipelineError::InputChangedDuringCompile {
            path: input.to_path_buf(),
            expected: fingerprint.to_string(),
            observed: observed.to_string(),
        });
    }
    Ok(())
}

/// Persist log, index and manifest in that order. If any step fails the
/// files already moved into place are removed again.
fn promote_artifact(
    evlog: NamedTempFile,
    index: NamedTempFile,
    manifest: NamedTempFile,
    paths: &ArtifactPaths,
) -> Result<(), PipelineError> {
    let staged = [(evlog, &paths.evlog), (index, &paths.index), (manifest, &paths.manifest)];
    let mut persisted: Vec<&Path> = Vec::with_capacity(staged.len());
    for (file, path) in staged {
        if let Err(e) = persist(file, path) {
            for done in persisted {
                if let Err(rm) = std::fs::remove_file(done) {
                    warn!(path = %done.display(), error = %rm, "could not roll back persisted file");
                }
            }
            return Err(e);
        }
        persisted.push(path);
    }
    Ok(())
}

fn temp_in(dir: &Path) -> Result<NamedTempFile, PipelineError> {
    NamedTempFile::new_in(dir)
        .map_err(|e| PipelineError::io(format!("create temporary file in {}", dir.display()), e))
}

fn unbuffer(buffered: BufWriter<NamedTempFile>) -> Result<NamedTempFile, PipelineError> {
    let file = buffered
        .into_inner()
        .map_err(|e| PipelineError::io("flush temporary file", e.into_error()))?;
    sync(&file)?;
    Ok(file)
}

fn sync(file: &NamedTempFile) -> Result<(), PipelineError> {
    file.as_file()
        .sync_all()
        .map_err(|e| PipelineError::io("sync temporary file", e))
}

fn persist(file: NamedTempFile, path: &Path) -> Result<File, PipelineError> {
    file.persist(path)
        .map_err(|e| PipelineError::io(format!("persist {}", path.display()), e.error))
}

fn promote_quarantine(mut sink: QuarantineFile, paths: &ArtifactPaths) -> Result<(), PipelineError> {
    sink.flush()?;
    let file = unbuffer(sink.into_inner()?)?;
    persist(file, &paths.quarantine)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input_unchanged() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("input.csv");
        std::fs::write(&input, "a,b\n1,2\n").unwrap();
        let fingerprint = FileFingerprint::capture(&input).unwrap();
        check_input_unchanged(&input, &fingerprint).unwrap();

        std::fs::write(&input, "a,b\n1,3\n").unwrap();
        let err = check_input_unchanged(&input, &fingerprint).unwrap_err();
        assert_eq!(err.reason_code(), "input_changed_during_compile");
        assert!(matches!(err, PipelineError::InputChangedDuringCompile { .. }));
    }

    #[test]
    fn test_utc_date_of_micros() {
        assert_eq!(utc_date_of_micros(0).unwrap(), "1970-01-01");
        // 2024-01-01T00:00:00Z
        assert_eq!(utc_date_of_micros(1_704_067_200_000_000).unwrap(), "2024-01-01");
        assert_eq!(utc_date_of_micros(1_704_067_199_999_999).unwrap(), "2023-12-31");
    }
}
