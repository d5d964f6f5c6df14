//! Writer/reader tests over in-memory and on-disk artifacts.

use super::*;
use crate::common::errors::PipelineError;
use crate::common::instrument::Instrument;
use crate::common::types::Side;
use std::io::Cursor;

fn header() -> EvlogHeader {
    EvlogHeader::for_instrument(&Instrument::from_strings("0.01", "0.001").unwrap())
}

fn batches() -> Vec<Batch> {
    vec![
        Batch::new(
            100_000,
            true,
            vec![
                LevelUpdate::new(Side::Bid, 10_000, 50),
                LevelUpdate::new(Side::Ask, 10_100, 50),
            ],
        ),
        Batch::new(200_000, false, vec![LevelUpdate::new(Side::Bid, 10_000, 0)]),
        Batch::new(300_000, false, vec![LevelUpdate::new(Side::Bid, 9_990, 7)]),
        Batch::new(400_000, false, vec![]),
    ]
}

#[test]
fn test_round_trip_is_byte_identical() {
    let (bytes, _) = encode_event_log(header(), &batches()).unwrap();
    let (decoded_header, decoded) = decode_event_log(&bytes).unwrap();
    assert_eq!(decoded_header, header());
    assert_eq!(decoded, batches());

    let (reencoded, _) = encode_event_log(decoded_header, &decoded).unwrap();
    assert_eq!(reencoded, bytes);
}

#[test]
fn test_reader_assigns_sequential_batch_ids_and_restarts() {
    let (bytes, _) = encode_event_log(header(), &batches()).unwrap();
    let mut reader = EventLogReader::new(Cursor::new(bytes)).unwrap();
    let ids: Vec<u64> = reader.by_ref().map(|r| r.unwrap().0).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);

    reader.rewind().unwrap();
    let (id, batch) = reader.next_batch().unwrap().unwrap();
    assert_eq!(id, 0);
    assert_eq!(batch, batches()[0]);
}

#[test]
fn test_seek_with_and_without_index_agree() {
    let (bytes, summary) = encode_event_log(header(), &batches()).unwrap();

    let mut linear = EventLogReader::new(Cursor::new(bytes.clone())).unwrap();
    let mut indexed = EventLogReader::new(Cursor::new(bytes))
        .unwrap()
        .with_index(summary.index)
        .unwrap();

    for target in [0, 100_000, 150_000, 300_000, 399_999] {
        linear.seek_time(target).unwrap();
        indexed.seek_time(target).unwrap();
        let a = linear.next_batch().unwrap();
        let b = indexed.next_batch().unwrap();
        assert_eq!(a, b, "seek to {}", target);
        assert!(a.unwrap().1.ts_recv_ns >= target);
    }

    linear.seek_time(500_000).unwrap();
    indexed.seek_time(500_000).unwrap();
    assert!(linear.next_batch().unwrap().is_none());
    assert!(indexed.next_batch().unwrap().is_none());
}

#[test]
fn test_seek_keeps_batch_ids_absolute() {
    let (bytes, summary) = encode_event_log(header(), &batches()).unwrap();
    let mut reader = EventLogReader::new(Cursor::new(bytes))
        .unwrap()
        .with_index(summary.index)
        .unwrap();
    reader.seek_time(250_000).unwrap();
    let (id, batch) = reader.next_batch().unwrap().unwrap();
    assert_eq!(id, 2);
    assert_eq!(batch.ts_recv_ns, 300_000);
}

#[test]
fn test_truncated_log_is_decode_error() {
    let (bytes, _) = encode_event_log(header(), &batches()).unwrap();
    let truncated = bytes[..bytes.len() - 3].to_vec();
    let reader = EventLogReader::new(Cursor::new(truncated)).unwrap();
    let results: Vec<_> = reader.collect();
    assert!(matches!(
        results.last(),
        Some(Err(PipelineError::DecodeError { .. }))
    ));
}

#[test]
fn test_short_header_is_decode_error() {
    let result = EventLogReader::new(Cursor::new(b"L2EV".to_vec()));
    assert!(matches!(result, Err(PipelineError::DecodeError { .. })));
}

#[test]
fn test_index_with_wrong_timestamp_is_index_mismatch() {
    let (bytes, _) = encode_event_log(header(), &batches()).unwrap();
    let mut forged = EventIndex::new();
    forged
        .push(IndexEntry {
            ts_recv_ns: 150_000,
            byte_offset: format::HEADER_LEN as u64,
        })
        .unwrap();
    let mut reader = EventLogReader::new(Cursor::new(bytes))
        .unwrap()
        .with_index(forged)
        .unwrap();
    reader.seek_time(150_000).unwrap();
    assert!(matches!(
        reader.next_batch(),
        Err(PipelineError::IndexMismatch { .. })
    ));
}

#[test]
fn test_index_beyond_log_is_rejected() {
    let (bytes, _) = encode_event_log(header(), &batches()[..1]).unwrap();
    let mut index = EventIndex::new();
    index
        .push(IndexEntry {
            ts_recv_ns: 1,
            byte_offset: format::HEADER_LEN as u64,
        })
        .unwrap();
    index
        .push(IndexEntry {
            ts_recv_ns: 2,
            byte_offset: 10_000,
        })
        .unwrap();
    let reader = EventLogReader::new(Cursor::new(bytes)).unwrap();
    assert!(matches!(
        reader.with_index(index),
        Err(PipelineError::IndexMismatch { .. })
    ));
}

#[test]
fn test_out_of_order_batches_in_log_are_rejected() {
    let mut bytes = Vec::new();
    format::encode_header(&header(), &mut bytes);
    format::encode_batch(&Batch::new(200, false, vec![]), &mut bytes).unwrap();
    format::encode_batch(&Batch::new(100, false, vec![]), &mut bytes).unwrap();
    assert!(matches!(
        decode_event_log(&bytes),
        Err(PipelineError::DecodeError { .. })
    ));
}
