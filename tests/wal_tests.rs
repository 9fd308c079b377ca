// Write-ahead log tests
// Framing across blocks, torn tails, damaged chunks, strict mode and offsets.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use stratadb::reporter::{CorruptionReporter, RecordingReporter};
use stratadb::wal::{LogReader, LogWriter, BLOCK_SIZE, HEADER_SIZE};
use tempfile::TempDir;

fn record(i: usize, len: usize) -> Vec<u8> {
    (0..len).map(|j| ((i * 31 + j) % 251) as u8).collect()
}

fn write_all(path: &Path, records: &[Vec<u8>]) {
    let mut writer = LogWriter::create(path).unwrap();
    for r in records {
        writer.add_record(r).unwrap();
    }
    writer.sync().unwrap();
}

fn read_all(path: &Path, reporter: Option<Arc<RecordingReporter>>) -> Vec<Vec<u8>> {
    let reporter = reporter.map(|r| r as Arc<dyn CorruptionReporter>);
    let mut reader = LogReader::open(path, reporter).unwrap();
    let mut out = Vec::new();
    while let Some(r) = reader.read_record().unwrap() {
        out.push(r);
    }
    out
}

fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] ^= 0x5a;
    std::fs::write(path, bytes).unwrap();
}

// =============================================================================
// Test 1: Records of every size come back unchanged
// =============================================================================
#[test]
fn records_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let records: Vec<Vec<u8>> = [0, 1, 100, BLOCK_SIZE - 1, BLOCK_SIZE, 3 * BLOCK_SIZE + 17, 5]
        .iter()
        .enumerate()
        .map(|(i, &len)| record(i, len))
        .collect();
    write_all(&path, &records);

    let reporter = Arc::new(RecordingReporter::new("log"));
    assert_eq!(read_all(&path, Some(reporter.clone())), records);
    assert!(reporter.take_error().is_none());
}

// =============================================================================
// Test 2: A record that exactly fills a block reads back once
// =============================================================================
#[test]
fn record_filling_block_exactly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let records = vec![record(0, BLOCK_SIZE - HEADER_SIZE), record(1, 10)];
    write_all(&path, &records);

    assert_eq!(std::fs::metadata(&path).unwrap().len(), (BLOCK_SIZE + HEADER_SIZE + 10) as u64);
    assert_eq!(read_all(&path, None), records);
}

// =============================================================================
// Test 3: A block tail too short for a header is padded and skipped
// =============================================================================
#[test]
fn short_block_trailer_is_padding() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    // Leaves HEADER_SIZE - 1 bytes at the end of the first block.
    let records = vec![record(0, BLOCK_SIZE - 2 * HEADER_SIZE + 1), record(1, 10)];
    write_all(&path, &records);

    assert_eq!(std::fs::metadata(&path).unwrap().len(), (BLOCK_SIZE + HEADER_SIZE + 10) as u64);
    assert_eq!(read_all(&path, None), records);
}

// =============================================================================
// Test 4: A torn final record is the end of the log, not corruption
// =============================================================================
#[test]
fn torn_tail_is_silently_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let records: Vec<Vec<u8>> = (0..3).map(|i| record(i, 100)).collect();
    write_all(&path, &records);

    let len = std::fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

    let reporter = Arc::new(RecordingReporter::new("log"));
    assert_eq!(read_all(&path, Some(reporter.clone())), records[..2].to_vec());
    assert!(reporter.take_error().is_none());

    // Cut inside the header of the last record.
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(2 * (HEADER_SIZE as u64 + 100) + 4)
        .unwrap();
    assert_eq!(read_all(&path, Some(reporter.clone())), records[..2].to_vec());
    assert!(reporter.take_error().is_none());
}

// =============================================================================
// Test 5: Zero-filled space after the last record is skipped quietly
// =============================================================================
#[test]
fn zero_filled_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let records: Vec<Vec<u8>> = (0..2).map(|i| record(i, 50)).collect();
    write_all(&path, &records);
    OpenOptions::new().append(true).open(&path).unwrap().write_all(&[0u8; 100]).unwrap();

    let reporter = Arc::new(RecordingReporter::new("log"));
    assert_eq!(read_all(&path, Some(reporter.clone())), records);
    assert_eq!(reporter.dropped_bytes(), 0);
}

// =============================================================================
// Test 6: Damage skips to the next block and is reported
// =============================================================================
#[test]
fn damaged_chunk_resyncs_at_next_block() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    // Ten small records, then one spanning into the second block, then one
    // more in the second block.
    let mut records: Vec<Vec<u8>> = (0..10).map(|i| record(i, 1000)).collect();
    records.push(record(10, 40_000));
    records.push(record(11, 100));
    write_all(&path, &records);

    // Inside the payload of the second record.
    flip_byte(&path, HEADER_SIZE + 1000 + HEADER_SIZE + 500);

    let reporter = Arc::new(RecordingReporter::new("log"));
    let got = read_all(&path, Some(reporter.clone()));
    assert_eq!(got, vec![records[0].clone(), records[11].clone()]);
    assert!(reporter.dropped_bytes() > 0);
    assert!(reporter.take_error().unwrap().is_corruption());
}

// =============================================================================
// Test 7: Strict mode fails on the first damage
// =============================================================================
#[test]
fn strict_mode_errors_on_damage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let records: Vec<Vec<u8>> = (0..5).map(|i| record(i, 1000)).collect();
    write_all(&path, &records);
    flip_byte(&path, HEADER_SIZE + 1000 + HEADER_SIZE + 500);

    let file = BufReader::new(File::open(&path).unwrap());
    let mut reader = LogReader::new(file, None, true, 0).strict(true);
    assert_eq!(reader.read_record().unwrap().unwrap(), records[0]);
    assert!(reader.read_record().unwrap_err().is_corruption());
}

// =============================================================================
// Test 8: Without checksum verification damaged payloads pass through
// =============================================================================
#[test]
fn unverified_read_returns_damaged_payload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let records: Vec<Vec<u8>> = (0..3).map(|i| record(i, 1000)).collect();
    write_all(&path, &records);
    flip_byte(&path, HEADER_SIZE + 1000 + HEADER_SIZE + 500);

    let file = BufReader::new(File::open(&path).unwrap());
    let got: Vec<Vec<u8>> = LogReader::new(file, None, false, 0).map(|r| r.unwrap()).collect();
    assert_eq!(got.len(), 3);
    assert_eq!(got[0], records[0]);
    assert_ne!(got[1], records[1]);
    assert_eq!(got[2], records[2]);
}

// =============================================================================
// Test 9: Reading from an initial offset skips earlier records
// =============================================================================
#[test]
fn initial_offset_skips_earlier_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000003.log");
    let mut records: Vec<Vec<u8>> = (0..3).map(|i| record(i, 1000)).collect();
    records.push(record(3, 2 * BLOCK_SIZE));
    records.push(record(4, 10));
    write_all(&path, &records);
    let stride = (HEADER_SIZE + 1000) as u64;

    let file = BufReader::new(File::open(&path).unwrap());
    let mut reader = LogReader::new(file, None, true, stride);
    assert_eq!(reader.read_record().unwrap().unwrap(), records[1]);
    assert_eq!(reader.last_record_offset(), stride);

    // An offset inside a record starts at the next one.
    let file = BufReader::new(File::open(&path).unwrap());
    let mut reader = LogReader::new(file, None, true, 1);
    assert_eq!(reader.read_record().unwrap().unwrap(), records[1]);

    // An offset inside the fragmented record skips its remaining chunks.
    let file = BufReader::new(File::open(&path).unwrap());
    let mut reader = LogReader::new(file, None, true, BLOCK_SIZE as u64 + 100);
    assert_eq!(reader.read_record().unwrap().unwrap(), records[4]);
    assert!(reader.read_record().unwrap().is_none());
}

// =============================================================================
// Test 10: Appending to an existing log keeps the block alignment
// =============================================================================
#[test]
fn append_to_existing_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("MANIFEST-000002");
    let first = vec![record(0, 20_000), record(1, 20_000)];
    write_all(&path, &first);

    let mut writer = LogWriter::append_to(&path).unwrap();
    assert_eq!(writer.offset(), std::fs::metadata(&path).unwrap().len());
    writer.add_record(&record(2, 30_000)).unwrap();
    writer.sync().unwrap();
    assert_eq!(writer.offset(), std::fs::metadata(&path).unwrap().len());
    drop(writer);

    let mut expected = first;
    expected.push(record(2, 30_000));
    assert_eq!(read_all(&path, None), expected);
}
