// Block builder and reader tests
// Prefix-compressed entries, restart points, seeking in both directions.

use std::sync::Arc;

use bytes::Bytes;
use stratadb::comparator::{BytewiseComparator, Comparator};
use stratadb::iterator::{collect_entries, StorageIterator};
use stratadb::sstable::block::{Block, BlockBuilder};

fn cmp() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

fn build(entries: &[(&str, &str)], restart_interval: usize) -> Block {
    let mut builder = BlockBuilder::new(restart_interval, cmp());
    for (k, v) in entries {
        builder.add(k.as_bytes(), v.as_bytes()).unwrap();
    }
    Block::new(Bytes::copy_from_slice(builder.finish())).unwrap()
}

fn numbered(n: usize) -> Vec<(String, String)> {
    (0..n).map(|i| (format!("key{i:05}"), format!("value{i}"))).collect()
}

// =============================================================================
// Test 1: Entries come back in order
// =============================================================================
#[test]
fn entries_round_trip_in_order() {
    let entries = numbered(100);
    let refs: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let block = build(&refs, 16);

    let mut iter = block.iter(cmp());
    iter.seek_to_first().unwrap();
    let got = collect_entries(&mut iter).unwrap();
    assert_eq!(got.len(), 100);
    for (i, (k, v)) in got.iter().enumerate() {
        assert_eq!(k, entries[i].0.as_bytes());
        assert_eq!(v, entries[i].1.as_bytes());
    }
}

// =============================================================================
// Test 2: Out-of-order and duplicate keys are rejected
// =============================================================================
#[test]
fn out_of_order_keys_rejected() {
    let mut builder = BlockBuilder::new(16, cmp());
    builder.add(b"b", b"1").unwrap();
    assert!(builder.add(b"a", b"2").is_err());
    assert!(builder.add(b"b", b"3").is_err());
    builder.add(b"c", b"4").unwrap();
}

// =============================================================================
// Test 3: Size estimate never shrinks while adding
// =============================================================================
#[test]
fn size_estimate_is_monotonic() {
    let mut builder = BlockBuilder::new(4, cmp());
    let mut last = builder.current_size_estimate();
    for (k, v) in numbered(50) {
        builder.add(k.as_bytes(), v.as_bytes()).unwrap();
        let now = builder.current_size_estimate();
        assert!(now >= last);
        last = now;
    }
    let finished = builder.finish().len();
    assert_eq!(finished, last);
}

// =============================================================================
// Test 4: Adding after finish fails; reset starts over
// =============================================================================
#[test]
fn add_after_finish_fails_until_reset() {
    let mut builder = BlockBuilder::new(16, cmp());
    builder.add(b"a", b"1").unwrap();
    builder.finish();
    assert!(builder.add(b"b", b"2").is_err());

    builder.reset();
    assert!(builder.is_empty());
    builder.add(b"a", b"again").unwrap();
}

// =============================================================================
// Test 5: Empty and truncated buffers are corruption
// =============================================================================
#[test]
fn empty_or_short_buffer_is_corruption() {
    assert!(Block::new(Bytes::new()).unwrap_err().is_corruption());
    assert!(Block::new(Bytes::from_static(&[1, 2])).unwrap_err().is_corruption());
    // Claims 100 restarts in an 8-byte block.
    let mut bogus = vec![0u8; 4];
    bogus.extend_from_slice(&100u32.to_le_bytes());
    assert!(Block::new(Bytes::from(bogus)).unwrap_err().is_corruption());
}

// =============================================================================
// Test 6: Seek lands on the first key >= target
// =============================================================================
#[test]
fn seek_finds_first_key_at_or_after_target() {
    let block = build(&[("apple", "1"), ("banana", "2"), ("cherry", "3"), ("date", "4")], 2);
    let mut iter = block.iter(cmp());

    iter.seek(b"banana").unwrap();
    assert_eq!(iter.key(), b"banana");

    iter.seek(b"c").unwrap();
    assert_eq!(iter.key(), b"cherry");

    iter.seek(b"a").unwrap();
    assert_eq!(iter.key(), b"apple");

    iter.seek(b"zebra").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 7: Seek works for every restart interval
// =============================================================================
#[test]
fn seek_with_various_restart_intervals() {
    let entries = numbered(200);
    let refs: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    for interval in [1, 2, 3, 16, 1000] {
        let block = build(&refs, interval);
        let mut iter = block.iter(cmp());
        for (k, v) in entries.iter().step_by(7) {
            iter.seek(k.as_bytes()).unwrap();
            assert!(iter.is_valid(), "interval {interval} key {k}");
            assert_eq!(iter.key(), k.as_bytes());
            assert_eq!(iter.value(), v.as_bytes());
        }
    }
}

// =============================================================================
// Test 8: Reverse iteration visits everything backwards
// =============================================================================
#[test]
fn reverse_iteration() {
    let entries = numbered(40);
    let refs: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let block = build(&refs, 3);

    let mut iter = block.iter(cmp());
    iter.seek_to_last().unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push(iter.key().to_vec());
        iter.prev().unwrap();
    }
    seen.reverse();
    let expected: Vec<Vec<u8>> = entries.iter().map(|(k, _)| k.as_bytes().to_vec()).collect();
    assert_eq!(seen, expected);
}

// =============================================================================
// Test 9: Direction changes mid-block
// =============================================================================
#[test]
fn next_and_prev_interleave() {
    let block = build(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")], 2);
    let mut iter = block.iter(cmp());
    iter.seek(b"c").unwrap();
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"b");
    iter.next().unwrap();
    iter.next().unwrap();
    assert_eq!(iter.key(), b"d");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"c");
}

// =============================================================================
// Test 10: Shared prefixes are compressed away
// =============================================================================
#[test]
fn prefix_compression_shrinks_block() {
    let long_prefix = "a_very_long_common_prefix_for_every_key_";
    let keys: Vec<String> = (0..100).map(|i| format!("{long_prefix}{i:04}")).collect();

    let mut compressed = BlockBuilder::new(16, cmp());
    let mut uncompressed = BlockBuilder::new(1, cmp());
    for k in &keys {
        compressed.add(k.as_bytes(), b"v").unwrap();
        uncompressed.add(k.as_bytes(), b"v").unwrap();
    }
    assert!(compressed.finish().len() < uncompressed.finish().len() / 2);
}
