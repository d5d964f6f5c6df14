//! Artifact manifest and file naming.
//!
//! The manifest is the out-of-band description of one compiled artifact.
//! It contains no wall-clock data, so recompiling identical input yields
//! an identical manifest.

use crate::common::errors::PipelineError;
use crate::common::types::Nanos;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const EVLOG_EXT: &str = "evlog";
pub const INDEX_EXT: &str = "idx";
pub const MANIFEST_SUFFIX: &str = ".manifest.json";
pub const QUARANTINE_SUFFIX: &str = ".quarantine.jsonl";
pub const REPLAY_QUARANTINE_SUFFIX: &str = ".replay.quarantine.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u16,
    /// SHA-256 over the canonical encoding of accepted rows.
    pub input_hash: String,
    /// SHA-256 over the `.evlog` bytes.
    pub output_hash: String,
    /// SHA-256 over the `.idx` bytes.
    pub index_hash: String,
    pub source_sha256: String,
    pub source_size: u64,
    pub price_increment: String,
    pub amount_increment: String,
    pub exchange: String,
    pub symbol: String,
    pub date: String,
    pub row_count: u64,
    pub batch_count: u64,
    pub update_count: u64,
    pub quarantine_count: u64,
    pub first_ts_ns: Option<Nanos>,
    pub last_ts_ns: Option<Nanos>,
    pub compiler_version: String,
}

impl Manifest {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::io("serialize manifest", e.into()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path)
            .map_err(|e| PipelineError::io(format!("read manifest {}", path.display()), e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::decode(
                e.column() as u64,
                format!("manifest {} is not valid JSON: {}", path.display(), e),
            )
        })
    }
}

/// Final paths of the files belonging to one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub evlog: PathBuf,
    pub index: PathBuf,
    pub manifest: PathBuf,
    /// Compile-time quarantine.
    pub quarantine: PathBuf,
    /// Default destination for batches skipped during replay.
    pub replay_quarantine: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            evlog: dir.join(format!("{}.{}", prefix, EVLOG_EXT)),
            index: dir.join(format!("{}.{}", prefix, INDEX_EXT)),
            manifest: dir.join(format!("{}{}", prefix, MANIFEST_SUFFIX)),
            quarantine: dir.join(format!("{}{}", prefix, QUARANTINE_SUFFIX)),
            replay_quarantine: dir.join(format!("{}{}", prefix, REPLAY_QUARANTINE_SUFFIX)),
        }
    }

    /// Sibling paths of an existing `.evlog` file.
    pub fn from_evlog(evlog: &Path) -> Self {
        let dir = evlog.parent().unwrap_or_else(|| Path::new(""));
        let prefix = evlog
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(dir, &prefix)
    }

    pub fn directory(&self) -> &Path {
        self.evlog.parent().unwrap_or_else(|| Path::new(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest {
            format_version: 1,
            input_hash: "aa".into(),
            output_hash: "bb".into(),
            index_hash: "cc".into(),
            source_sha256: "dd".into(),
            source_size: 10,
            price_increment: "0.01".into(),
            amount_increment: "1".into(),
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            date: "2024-01-01".into(),
            row_count: 3,
            batch_count: 2,
            update_count: 3,
            quarantine_count: 0,
            first_ts_ns: Some(100_000),
            last_ts_ns: Some(200_000),
            compiler_version: "0.1.0".into(),
        }
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let m = sample();
        let bytes = m.to_json_bytes().unwrap();
        let back: Manifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, m);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"row_count\": 3"));
    }

    #[test]
    fn test_artifact_paths() {
        let paths = ArtifactPaths::new(Path::new("/data"), "binance_BTCUSDT_2024-01-01");
        assert_eq!(paths.evlog, PathBuf::from("/data/binance_BTCUSDT_2024-01-01.evlog"));
        assert_eq!(paths.index, PathBuf::from("/data/binance_BTCUSDT_2024-01-01.idx"));
        assert_eq!(
            paths.manifest,
            PathBuf::from("/data/binance_BTCUSDT_2024-01-01.manifest.json")
        );
        assert_eq!(
            paths.replay_quarantine,
            PathBuf::from("/data/binance_BTCUSDT_2024-01-01.replay.quarantine.jsonl")
        );
        assert_eq!(ArtifactPaths::from_evlog(&paths.evlog), paths);
    }
}
