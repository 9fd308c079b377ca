// MemTable tests
// Versioned lookups, tombstones, ordering and concurrent access.

use std::sync::Arc;
use std::thread;

use stratadb::comparator::{BytewiseComparator, InternalKeyComparator};
use stratadb::iterator::StorageIterator;
use stratadb::memtable::skiplist::SkipList;
use stratadb::memtable::{LookupResult, MemTable};
use stratadb::types::{InternalKey, LookupKey, ParsedInternalKey, ValueType};

fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

fn new_mem() -> Arc<MemTable> {
    Arc::new(MemTable::new(icmp()))
}

fn lookup(mem: &MemTable, key: &str, sequence: u64) -> Option<LookupResult> {
    mem.get(&LookupKey::new(key.as_bytes(), sequence))
}

// =============================================================================
// Test 1: Put, overwrite and delete as seen by the newest reader
// =============================================================================
#[test]
fn put_overwrite_delete() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"apple", b"red");
    mem.add(2, ValueType::Value, b"banana", b"yellow");
    mem.add(3, ValueType::Value, b"apple", b"green");
    mem.add(4, ValueType::Deletion, b"banana", b"");

    assert_eq!(lookup(&mem, "apple", 10), Some(LookupResult::Found(b"green".to_vec())));
    assert_eq!(lookup(&mem, "banana", 10), Some(LookupResult::Deleted));
    assert_eq!(lookup(&mem, "cherry", 10), None);
    assert_eq!(mem.len(), 4);
}

// =============================================================================
// Test 2: Lookups only see entries at or below their sequence
// =============================================================================
#[test]
fn lookups_respect_sequence() {
    let mem = new_mem();
    mem.add(5, ValueType::Value, b"k", b"v5");
    mem.add(7, ValueType::Deletion, b"k", b"");
    mem.add(9, ValueType::Value, b"k", b"v9");

    assert_eq!(lookup(&mem, "k", 4), None);
    assert_eq!(lookup(&mem, "k", 5), Some(LookupResult::Found(b"v5".to_vec())));
    assert_eq!(lookup(&mem, "k", 6), Some(LookupResult::Found(b"v5".to_vec())));
    assert_eq!(lookup(&mem, "k", 7), Some(LookupResult::Deleted));
    assert_eq!(lookup(&mem, "k", 8), Some(LookupResult::Deleted));
    assert_eq!(lookup(&mem, "k", 9), Some(LookupResult::Found(b"v9".to_vec())));
}

// =============================================================================
// Test 3: A key that is a prefix of another does not match it
// =============================================================================
#[test]
fn prefix_keys_are_distinct() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"abc", b"long");
    assert_eq!(lookup(&mem, "ab", 10), None);
    mem.add(2, ValueType::Value, b"ab", b"short");
    assert_eq!(lookup(&mem, "ab", 10), Some(LookupResult::Found(b"short".to_vec())));
    assert_eq!(lookup(&mem, "abc", 10), Some(LookupResult::Found(b"long".to_vec())));
}

// =============================================================================
// Test 4: Iteration order is user key ascending, sequence descending
// =============================================================================
#[test]
fn iterator_orders_internal_keys() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"b", b"b1");
    mem.add(2, ValueType::Value, b"a", b"a2");
    mem.add(3, ValueType::Value, b"b", b"b3");
    mem.add(4, ValueType::Deletion, b"a", b"");

    let mut iter = mem.iter();
    iter.seek_to_first().unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
        seen.push((parsed.user_key.to_vec(), parsed.sequence, parsed.value_type));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), 4, ValueType::Deletion),
            (b"a".to_vec(), 2, ValueType::Value),
            (b"b".to_vec(), 3, ValueType::Value),
            (b"b".to_vec(), 1, ValueType::Value),
        ]
    );
}

// =============================================================================
// Test 5: Seek and reverse movement on the memtable iterator
// =============================================================================
#[test]
fn iterator_seek_and_prev() {
    let mem = new_mem();
    for (i, k) in ["a", "c", "e", "g"].iter().enumerate() {
        mem.add(i as u64 + 1, ValueType::Value, k.as_bytes(), b"v");
    }
    let mut iter = mem.iter();

    iter.seek(LookupKey::new(b"d", 100).internal_key()).unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"e");
    iter.prev().unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"c");

    iter.seek_to_last().unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"g");
    iter.next().unwrap();
    assert!(!iter.is_valid());

    iter.seek_to_first().unwrap();
    iter.prev().unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 6: An iterator sees inserts made after it was created
// =============================================================================
#[test]
fn iterator_observes_later_inserts() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"a", b"1");
    mem.add(2, ValueType::Value, b"c", b"3");

    let mut iter = mem.iter();
    iter.seek_to_first().unwrap();
    mem.add(3, ValueType::Value, b"b", b"2");
    iter.next().unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"b");
}

// =============================================================================
// Test 7: Memory usage grows with every insert
// =============================================================================
#[test]
fn memory_usage_grows() {
    let mem = new_mem();
    assert!(mem.is_empty());
    let mut last = mem.approximate_memory_usage();
    for i in 0..200u64 {
        mem.add(i + 1, ValueType::Value, format!("key{i}").as_bytes(), &[0u8; 64]);
        let now = mem.approximate_memory_usage();
        assert!(now >= last + 64);
        last = now;
    }
}

// =============================================================================
// Test 8: Readers run alongside a writer
// =============================================================================
#[test]
fn concurrent_readers_and_writer() {
    let mem = new_mem();
    const N: u64 = 2000;

    let writer = {
        let mem = Arc::clone(&mem);
        thread::spawn(move || {
            for i in 0..N {
                mem.add(i + 1, ValueType::Value, format!("key{i:05}").as_bytes(), format!("v{i}").as_bytes());
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let mem = Arc::clone(&mem);
            thread::spawn(move || {
                for i in (r..N).step_by(4) {
                    let key = format!("key{i:05}");
                    // Either not yet written, or written with its own value.
                    if let Some(found) = lookup(&mem, &key, u64::MAX >> 8) {
                        assert_eq!(found, LookupResult::Found(format!("v{i}").into_bytes()));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(mem.len(), N as usize);
    for i in 0..N {
        assert!(lookup(&mem, &format!("key{i:05}"), N).is_some());
    }
}

// =============================================================================
// Test 9: The skip list iterates internal keys in comparator order
// =============================================================================
#[test]
fn skiplist_orders_by_internal_key() {
    let mut list = SkipList::new(icmp());
    let mut keys = Vec::new();
    for i in (0..500).rev() {
        let key = InternalKey::new(format!("k{:03}", i % 100).as_bytes(), i, ValueType::Value);
        keys.push(key.encode().to_vec());
        list.insert(key.encode().to_vec(), i.to_le_bytes().to_vec());
    }
    assert_eq!(list.len(), 500);

    let got: Vec<Vec<u8>> = list.iter().map(|(k, _)| k.to_vec()).collect();
    let cmp = icmp();
    keys.sort_by(|a, b| stratadb::comparator::Comparator::compare(&cmp, a, b));
    assert_eq!(got, keys);

    let probe = InternalKey::new(b"k042", 242, ValueType::Value);
    assert_eq!(list.get(probe.encode()), Some(&242u64.to_le_bytes()[..]));
}
