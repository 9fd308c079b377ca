// Compaction tests
// Manual range compaction, garbage collection under snapshots, background
// compaction, and suspending it.

use std::path::Path;
use std::time::{Duration, Instant};

use stratadb::{Db, Options, ReadOptions, WriteOptions};
use tempfile::TempDir;

fn open(path: &Path) -> Db {
    Db::open(
        path,
        Options {
            create_if_missing: true,
            write_buffer_size: 64 * 1024,
            ..Options::default()
        },
    )
    .unwrap()
}

fn files_at(db: &Db, level: usize) -> usize {
    db.property(&format!("stratadb.num-files-at-level{level}"))
        .unwrap()
        .parse()
        .unwrap()
}

fn total_files(db: &Db) -> usize {
    (0..7).map(|l| files_at(db, l)).sum()
}

fn get(db: &Db, key: &str) -> Option<String> {
    db.get(&ReadOptions::new(), key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

/// Write keys 0..100 tagged with `round`, then flush them to a table.
fn write_round(db: &Db, round: usize) {
    for i in 0..100 {
        db.put(
            &WriteOptions::default(),
            format!("key{i:03}").as_bytes(),
            format!("r{round}-{}", "x".repeat(200)).as_bytes(),
        )
        .unwrap();
    }
    db.flush().unwrap();
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

// =============================================================================
// Test 1: Compacting everything drops deleted data
// =============================================================================
#[test]
fn compact_range_discards_deleted_data() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    write_round(&db, 1);
    assert!(total_files(&db) > 0);

    for i in 0..100 {
        db.delete(&WriteOptions::default(), format!("key{i:03}").as_bytes()).unwrap();
    }
    db.compact_range(None, None).unwrap();

    assert_eq!(total_files(&db), 0);
    assert_eq!(get(&db, "key050"), None);
    assert_eq!(db.approximate_sizes(&[(b"key000", b"key999")]), vec![0]);
}

// =============================================================================
// Test 2: Versions visible to a snapshot survive compaction
// =============================================================================
#[test]
fn snapshot_keeps_old_versions_alive() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    write_round(&db, 1);
    let snapshot = db.snapshot();
    for i in 0..100 {
        db.delete(&WriteOptions::default(), format!("key{i:03}").as_bytes()).unwrap();
    }
    db.compact_range(None, None).unwrap();

    assert!(total_files(&db) > 0);
    assert_eq!(get(&db, "key010"), None);
    let read = ReadOptions {
        snapshot: Some(snapshot.clone()),
        ..ReadOptions::new()
    };
    let old = db.get(&read, b"key010").unwrap().unwrap();
    assert!(old.starts_with(b"r1-"));

    db.release_snapshot(snapshot);
    drop(read);
    assert_eq!(get(&db, "key010"), None);
}

// =============================================================================
// Test 3: Overwritten values collapse to the newest one
// =============================================================================
#[test]
fn overwrites_collapse() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    for round in 1..=6 {
        write_round(&db, round);
    }
    let before: u64 = db.approximate_sizes(&[(b"key", b"kez")])[0];

    db.compact_range(None, None).unwrap();
    assert_eq!(files_at(&db, 0), 0);
    for i in (0..100).step_by(9) {
        assert!(get(&db, &format!("key{i:03}")).unwrap().starts_with("r6-"));
    }
    let after: u64 = db.approximate_sizes(&[(b"key", b"kez")])[0];
    assert!(after < before, "before {before}, after {after}");
}

// =============================================================================
// Test 4: A bounded range compaction keeps data outside the range
// =============================================================================
#[test]
fn bounded_compact_range() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    for round in 1..=5 {
        write_round(&db, round);
    }
    db.compact_range(Some(b"key020"), Some(b"key040")).unwrap();
    for i in 0..100 {
        assert!(get(&db, &format!("key{i:03}")).unwrap().starts_with("r5-"), "key{i:03}");
    }
}

// =============================================================================
// Test 5: Too many level-0 files trigger a background compaction
// =============================================================================
#[test]
fn background_compaction_drains_level0() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    for round in 1..=8 {
        write_round(&db, round);
    }
    wait_until("level 0 below the compaction trigger", || files_at(&db, 0) < 4);
    for i in (0..100).step_by(7) {
        assert!(get(&db, &format!("key{i:03}")).unwrap().starts_with("r8-"));
    }
    let stats = db.property("stratadb.stats").unwrap();
    assert!(stats.lines().count() > 3, "{stats}");
}

// =============================================================================
// Test 6: Suspended compactions let level 0 grow without stalling writes
// =============================================================================
#[test]
fn suspend_and_resume() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    db.suspend_compactions();

    // Enough flushes to pass the write-stop threshold if it applied.
    for round in 1..=14 {
        write_round(&db, round);
    }
    std::thread::sleep(Duration::from_millis(200));
    assert!(files_at(&db, 0) >= 12, "level 0 has {}", files_at(&db, 0));
    assert!(get(&db, "key001").unwrap().starts_with("r14-"));

    db.resume_compactions();
    wait_until("level 0 to drain", || files_at(&db, 0) < 4);
    for i in (0..100).step_by(11) {
        assert!(get(&db, &format!("key{i:03}")).unwrap().starts_with("r14-"));
    }
}

// =============================================================================
// Test 7: An explicit compaction runs while automatic ones are suspended
// =============================================================================
#[test]
fn manual_compaction_while_suspended() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    db.suspend_compactions();
    for round in 1..=6 {
        write_round(&db, round);
    }
    assert!(files_at(&db, 0) >= 4);

    db.compact_range(None, None).unwrap();
    assert_eq!(files_at(&db, 0), 0);
    assert!(total_files(&db) > 0);
    assert!(get(&db, "key099").unwrap().starts_with("r6-"));
}

// =============================================================================
// Test 8: A steady write load stays readable while compactions run
// =============================================================================
#[test]
fn reads_during_heavy_writes() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let value = "v".repeat(300);
    // Scattered key order so tables overlap.
    for n in 0..6000u64 {
        let i = (n * 7919) % 6000;
        db.put(&WriteOptions::default(), format!("k{i:05}").as_bytes(), format!("{i}{value}").as_bytes())
            .unwrap();
        if n % 1000 == 999 {
            let probe = ((n / 2) * 7919) % 6000;
            assert!(get(&db, &format!("k{probe:05}")).is_some());
        }
    }
    wait_until("level 0 below the compaction trigger", || files_at(&db, 0) < 4);
    for i in (0..6000).step_by(97) {
        assert_eq!(get(&db, &format!("k{i:05}")), Some(format!("{i}{value}")));
    }
    assert_eq!(db.property("stratadb.background-error").as_deref(), Some(""));
}
