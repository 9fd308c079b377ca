// Bloom filter tests
// No false negatives, false positive rate near target, sizing and encoding.

use stratadb::bloom::{BloomFilter, BloomFilterBuilder};

fn false_positive_rate(filter: &BloomFilter, probes: usize) -> f64 {
    let hits = (0..probes)
        .filter(|i| filter.may_contain(format!("absent-{i}").as_bytes()))
        .count();
    hits as f64 / probes as f64
}

// =============================================================================
// Test 1: Every inserted key is reported present
// =============================================================================
#[test]
fn no_false_negatives() {
    let mut filter = BloomFilter::new(10_000, 0.01).unwrap();
    for i in 0..10_000 {
        filter.insert(format!("key-{i}").as_bytes());
    }
    for i in 0..10_000 {
        assert!(filter.may_contain(format!("key-{i}").as_bytes()), "key-{i}");
    }
}

// =============================================================================
// Test 2: Measured false positive rate stays near the target
// =============================================================================
#[test]
fn false_positive_rate_near_target() {
    for target in [0.1, 0.01, 0.001] {
        let mut builder = BloomFilterBuilder::new(target);
        for i in 0..5_000 {
            builder.add_key(format!("key-{i}").as_bytes());
        }
        let filter = builder.build().unwrap();
        let measured = false_positive_rate(&filter, 50_000);
        assert!(measured < target * 2.0, "target {target}, measured {measured}");
    }
}

// =============================================================================
// Test 3: Lower rates buy more bits and more hashes
// =============================================================================
#[test]
fn sizing_follows_rate() {
    let loose = BloomFilter::new(1000, 0.1).unwrap();
    let tight = BloomFilter::new(1000, 0.001).unwrap();
    assert!(tight.num_bits() > loose.num_bits());
    assert!(tight.num_hashes() > loose.num_hashes());
    // ~10 bits per key at 1%.
    let one_percent = BloomFilter::new(1000, 0.01).unwrap();
    assert!((9_000..11_000).contains(&one_percent.num_bits()));
}

// =============================================================================
// Test 4: Rates outside (0, 1) are rejected
// =============================================================================
#[test]
fn invalid_rates_rejected() {
    for rate in [0.0, 1.0, -0.5, 2.0, f64::NAN] {
        assert!(BloomFilter::new(10, rate).is_err(), "rate {rate}");
    }
    assert!(BloomFilterBuilder::new(0.0).build().is_err());
}

// =============================================================================
// Test 5: Repeated keys count once when sizing
// =============================================================================
#[test]
fn builder_collapses_consecutive_duplicates() {
    let mut builder = BloomFilterBuilder::new(0.01);
    for _ in 0..10 {
        builder.add_key(b"same");
    }
    builder.add_key(b"other");
    assert_eq!(builder.len(), 2);
    let filter = builder.build().unwrap();
    assert!(filter.may_contain(b"same"));
    assert!(filter.may_contain(b"other"));
}

// =============================================================================
// Test 6: Encoded filters answer identically; damaged encodings are rejected
// =============================================================================
#[test]
fn encoding_round_trip_and_damage() {
    let mut builder = BloomFilterBuilder::new(0.01);
    for i in 0..500 {
        builder.add_key(format!("k{i}").as_bytes());
    }
    let filter = builder.build().unwrap();
    let encoded = filter.serialize();
    let decoded = BloomFilter::deserialize(&encoded).unwrap();
    assert_eq!(decoded, filter);

    assert!(BloomFilter::deserialize(&encoded[..encoded.len() - 3]).unwrap_err().is_corruption());
    assert!(BloomFilter::deserialize(&[0u8; 8]).unwrap_err().is_corruption());
    assert!(BloomFilter::deserialize(&[1, 2, 3]).unwrap_err().is_corruption());
}

// =============================================================================
// Test 7: An empty filter still answers without panicking
// =============================================================================
#[test]
fn empty_filter() {
    let filter = BloomFilterBuilder::new(0.01).build().unwrap();
    assert!(filter.num_bits() >= 64);
    assert!(false_positive_rate(&filter, 1000) < 0.05);
}
