//! Binary Event Log Format
//!
//! All integers little-endian.
//!
//! ```text
//! Header:  magic "L2EV" (4B) | version u16 | price_increment fixed64 | amount_increment fixed64
//! Batch:   ts_recv_ns i64 | update_count u16 | is_snapshot_reset u8
//! Update:  side u8 | ticks i64 | lots i64            -- repeated update_count times
//! ```
//!
//! Batches follow the header back to back with no padding or trailer, so the
//! encoding of a batch sequence is a pure function of its content.

use crate::common::errors::PipelineError;
use crate::common::instrument::Instrument;
use crate::common::types::{Lots, Nanos, Side, Ticks};

pub const EVLOG_MAGIC: [u8; 4] = *b"L2EV";
pub const FORMAT_VERSION: u16 = 1;

pub const HEADER_LEN: usize = 4 + 2 + 8 + 8;
pub const BATCH_HEADER_LEN: usize = 8 + 2 + 1;
pub const UPDATE_LEN: usize = 1 + 8 + 8;

pub const MAX_UPDATES_PER_BATCH: usize = u16::MAX as usize;

// =============================================================================
// LOGICAL RECORDS
// =============================================================================

/// One quantized price-level change. `lots == 0` removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelUpdate {
    pub side: Side,
    pub ticks: Ticks,
    pub lots: Lots,
}

impl LevelUpdate {
    pub fn new(side: Side, ticks: Ticks, lots: Lots) -> Self {
        Self { side, ticks, lots }
    }

    #[inline]
    pub fn is_delete(&self) -> bool {
        self.lots == 0
    }
}

/// All updates sharing one receive timestamp, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub ts_recv_ns: Nanos,
    pub is_snapshot_reset: bool,
    pub updates: Vec<LevelUpdate>,
}

impl Batch {
    pub fn new(ts_recv_ns: Nanos, is_snapshot_reset: bool, updates: Vec<LevelUpdate>) -> Self {
        Self {
            ts_recv_ns,
            is_snapshot_reset,
            updates,
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        BATCH_HEADER_LEN + self.updates.len() * UPDATE_LEN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvlogHeader {
    pub version: u16,
    pub price_increment_fixed64: i64,
    pub amount_increment_fixed64: i64,
}

impl EvlogHeader {
    pub fn for_instrument(instrument: &Instrument) -> Self {
        Self {
            version: FORMAT_VERSION,
            price_increment_fixed64: instrument.price_increment_fixed64(),
            amount_increment_fixed64: instrument.amount_increment_fixed64(),
        }
    }

    pub fn instrument(&self) -> Result<Instrument, PipelineError> {
        Instrument::from_fixed64(self.price_increment_fixed64, self.amount_increment_fixed64)
            .map_err(|e| PipelineError::decode(4 + 2, format!("header increments: {}", e)))
    }
}

/// Fixed-size prefix of a batch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub ts_recv_ns: Nanos,
    pub update_count: u16,
    pub is_snapshot_reset: bool,
}

// =============================================================================
// ENCODING
// =============================================================================

pub fn encode_header(header: &EvlogHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&EVLOG_MAGIC);
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&header.price_increment_fixed64.to_le_bytes());
    out.extend_from_slice(&header.amount_increment_fixed64.to_le_bytes());
}

pub fn encode_batch(batch: &Batch, out: &mut Vec<u8>) -> Result<(), PipelineError> {
    let count = u16::try_from(batch.updates.len()).map_err(|_| {
        PipelineError::schema_batch(format!(
            "batch at ts {} has {} updates, more than {}",
            batch.ts_recv_ns,
            batch.updates.len(),
            MAX_UPDATES_PER_BATCH
        ))
    })?;
    out.reserve(batch.encoded_len());
    out.extend_from_slice(&batch.ts_recv_ns.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.push(u8::from(batch.is_snapshot_reset));
    for update in &batch.updates {
        out.push(update.side.as_u8());
        out.extend_from_slice(&update.ticks.to_le_bytes());
        out.extend_from_slice(&update.lots.to_le_bytes());
    }
    Ok(())
}

// =============================================================================
// DECODING
// =============================================================================

fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(buf)
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Result<EvlogHeader, PipelineError> {
    if bytes[..4] != EVLOG_MAGIC {
        return Err(PipelineError::decode(0, format!("bad magic {:?}", &bytes[..4])));
    }
    let version = le_u16(&bytes[4..6]);
    if version != FORMAT_VERSION {
        return Err(PipelineError::decode(
            4,
            format!("unsupported format version {} (expected {})", version, FORMAT_VERSION),
        ));
    }
    Ok(EvlogHeader {
        version,
        price_increment_fixed64: le_i64(&bytes[6..14]),
        amount_increment_fixed64: le_i64(&bytes[14..22]),
    })
}

pub fn decode_batch_header(
    bytes: &[u8; BATCH_HEADER_LEN],
    offset: u64,
) -> Result<BatchHeader, PipelineError> {
    let is_snapshot_reset = match bytes[10] {
        0 => false,
        1 => true,
        other => {
            return Err(PipelineError::decode(
                offset + 10,
                format!("invalid is_snapshot_reset flag {}", other),
            ))
        }
    };
    Ok(BatchHeader {
        ts_recv_ns: le_i64(&bytes[0..8]),
        update_count: le_u16(&bytes[8..10]),
        is_snapshot_reset,
    })
}

pub fn decode_update(bytes: &[u8; UPDATE_LEN], offset: u64) -> Result<LevelUpdate, PipelineError> {
    let side = Side::from_u8(bytes[0])
        .ok_or_else(|| PipelineError::decode(offset, format!("invalid side {}", bytes[0])))?;
    let ticks = le_i64(&bytes[1..9]);
    let lots = le_i64(&bytes[9..17]);
    if ticks <= 0 {
        return Err(PipelineError::decode(offset + 1, format!("non-positive ticks {}", ticks)));
    }
    if lots < 0 {
        return Err(PipelineError::decode(offset + 9, format!("negative lots {}", lots)));
    }
    Ok(LevelUpdate { side, ticks, lots })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> Batch {
        Batch::new(
            1_000,
            true,
            vec![
                LevelUpdate::new(Side::Bid, 100, 5),
                LevelUpdate::new(Side::Ask, 101, 0),
            ],
        )
    }

    #[test]
    fn test_header_layout() {
        let header = EvlogHeader {
            version: FORMAT_VERSION,
            price_increment_fixed64: 10_000_000_000,
            amount_increment_fixed64: 1_000_000_000,
        };
        let mut out = Vec::new();
        encode_header(&header, &mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(&out[..4], b"L2EV");
        assert_eq!(&out[4..6], &[1, 0]);
        let arr: [u8; HEADER_LEN] = out.as_slice().try_into().unwrap();
        assert_eq!(decode_header(&arr).unwrap(), header);
    }

    #[test]
    fn test_batch_layout() {
        let batch = sample_batch();
        let mut out = Vec::new();
        encode_batch(&batch, &mut out).unwrap();
        assert_eq!(out.len(), batch.encoded_len());
        assert_eq!(out.len(), BATCH_HEADER_LEN + 2 * UPDATE_LEN);

        let head: [u8; BATCH_HEADER_LEN] = out[..BATCH_HEADER_LEN].try_into().unwrap();
        let decoded = decode_batch_header(&head, 0).unwrap();
        assert_eq!(decoded.ts_recv_ns, 1_000);
        assert_eq!(decoded.update_count, 2);
        assert!(decoded.is_snapshot_reset);

        let upd: [u8; UPDATE_LEN] = out[BATCH_HEADER_LEN..BATCH_HEADER_LEN + UPDATE_LEN]
            .try_into()
            .unwrap();
        assert_eq!(decode_update(&upd, 0).unwrap(), LevelUpdate::new(Side::Bid, 100, 5));
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            decode_header(&bytes),
            Err(PipelineError::DecodeError { .. })
        ));

        bytes[..4].copy_from_slice(b"L2EV");
        bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            decode_header(&bytes),
            Err(PipelineError::DecodeError { offset: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_update_fields() {
        let mut bytes = [0u8; UPDATE_LEN];
        bytes[0] = 7;
        assert!(decode_update(&bytes, 0).is_err());

        bytes[0] = 0;
        bytes[1..9].copy_from_slice(&0i64.to_le_bytes());
        assert!(decode_update(&bytes, 0).is_err());

        bytes[1..9].copy_from_slice(&10i64.to_le_bytes());
        bytes[9..17].copy_from_slice(&(-1i64).to_le_bytes());
        assert!(decode_update(&bytes, 0).is_err());
    }

    #[test]
    fn test_oversized_batch_is_batch_scoped() {
        let updates = vec![LevelUpdate::new(Side::Bid, 1, 1); MAX_UPDATES_PER_BATCH + 1];
        let batch = Batch::new(0, false, updates);
        let err = encode_batch(&batch, &mut Vec::new()).unwrap_err();
        assert_eq!(err.scope(), crate::common::errors::ErrorScope::Batch);
    }
}
