//! Artifact verification: recompute hashes and walk the log against its
//! index and manifest.

use crate::common::errors::PipelineError;
use crate::common::hashing::{sha256_hex, FileFingerprint};
use crate::evlog::index::EventIndex;
use crate::evlog::manifest::{ArtifactPaths, Manifest};
use crate::evlog::reader::EventLogReader;
use tracing::info;

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub manifest: Manifest,
    pub batch_count: u64,
    pub update_count: u64,
    pub bytes: u64,
}

pub fn verify_artifact(paths: &ArtifactPaths) -> Result<VerifyReport, PipelineError> {
    let manifest = Manifest::load(&paths.manifest)?;

    let log_fp = FileFingerprint::capture(&paths.evlog)?;
    if log_fp.sha256 != manifest.output_hash {
        return Err(PipelineError::decode(
            0,
            format!(
                "event log hash {} != manifest output_hash {}",
                log_fp.sha256, manifest.output_hash
            ),
        ));
    }

    let index_bytes = std::fs::read(&paths.index)
        .map_err(|e| PipelineError::io(format!("read index {}", paths.index.display()), e))?;
    let index_hash = sha256_hex(&index_bytes);
    if index_hash != manifest.index_hash {
        return Err(PipelineError::index_mismatch(format!(
            "index hash {} != manifest index_hash {}",
            index_hash, manifest.index_hash
        )));
    }
    let index = EventIndex::decode(&index_bytes)?;
    index.validate_batch_count(manifest.batch_count)?;

    let mut reader = EventLogReader::open(&paths.evlog)?;
    let instrument = *reader.instrument();
    if instrument.price_increment().to_string() != manifest.price_increment
        || instrument.amount_increment().to_string() != manifest.amount_increment
    {
        return Err(PipelineError::decode(
            0,
            format!(
                "header increments {}/{} disagree with manifest {}/{}",
                instrument.price_increment(),
                instrument.amount_increment(),
                manifest.price_increment,
                manifest.amount_increment
            ),
        ));
    }

    let mut batch_count = 0u64;
    let mut update_count = 0u64;
    loop {
        let offset = reader.position();
        let Some((batch_id, batch)) = reader.next_batch()? else {
            break;
        };
        let entry = index.entries().get(batch_id as usize).ok_or_else(|| {
            PipelineError::index_mismatch(format!("batch {} has no index entry", batch_id))
        })?;
        if entry.byte_offset != offset || entry.ts_recv_ns != batch.ts_recv_ns {
            return Err(PipelineError::index_mismatch(format!(
                "batch {} at ({}, {}) but index says ({}, {})",
                batch_id, batch.ts_recv_ns, offset, entry.ts_recv_ns, entry.byte_offset
            )));
        }
        batch_count += 1;
        update_count += batch.updates.len() as u64;
    }

    if batch_count != manifest.batch_count || update_count != manifest.update_count {
        return Err(PipelineError::decode(
            log_fp.size,
            format!(
                "log holds {} batches / {} updates, manifest says {} / {}",
                batch_count, update_count, manifest.batch_count, manifest.update_count
            ),
        ));
    }

    info!(
        evlog = %paths.evlog.display(),
        batches = batch_count,
        updates = update_count,
        "artifact verified"
    );
    Ok(VerifyReport {
        manifest,
        batch_count,
        update_count,
        bytes: log_fp.size,
    })
}
