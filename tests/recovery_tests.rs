// Recovery tests
// Reopening, log replay, open flags, destroying and repairing databases.

use std::path::{Path, PathBuf};

use stratadb::{destroy_db, repair_db, Db, Error, Options, ReadOptions, WriteBatch, WriteOptions};
use tempfile::TempDir;

fn options() -> Options {
    Options {
        create_if_missing: true,
        ..Options::default()
    }
}

fn put(db: &Db, key: &str, value: &str) {
    db.put(&WriteOptions::default(), key.as_bytes(), value.as_bytes()).unwrap();
}

fn get(db: &Db, key: &str) -> Option<String> {
    db.get(&ReadOptions::new(), key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.file_name().unwrap().to_str().unwrap().ends_with(suffix))
        .collect();
    out.sort();
    out
}

// =============================================================================
// Test 1: Unflushed writes are replayed from the log
// =============================================================================
#[test]
fn reopen_replays_log() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open(dir.path(), options()).unwrap();
        put(&db, "a", "1");
        put(&db, "b", "2");
        db.delete(&WriteOptions::default(), b"a").unwrap();
        assert_eq!(db.last_sequence(), 3);
    }
    let db = Db::open(dir.path(), options()).unwrap();
    assert_eq!(get(&db, "a"), None);
    assert_eq!(get(&db, "b").as_deref(), Some("2"));
    assert_eq!(db.last_sequence(), 3);

    // New writes continue the sequence.
    put(&db, "c", "3");
    assert_eq!(db.last_sequence(), 4);
}

// =============================================================================
// Test 2: Tables and log tail both survive several reopenings
// =============================================================================
#[test]
fn repeated_reopen_keeps_everything() {
    let dir = TempDir::new().unwrap();
    for round in 0..4 {
        let db = Db::open(dir.path(), options()).unwrap();
        for i in 0..200 {
            put(&db, &format!("r{round}-{i:03}"), &format!("{round}:{i}"));
        }
        if round % 2 == 0 {
            db.flush().unwrap();
        }
        put(&db, "latest", &round.to_string());
    }

    let db = Db::open(dir.path(), options()).unwrap();
    for round in 0..4 {
        for i in (0..200).step_by(23) {
            assert_eq!(get(&db, &format!("r{round}-{i:03}")), Some(format!("{round}:{i}")));
        }
    }
    assert_eq!(get(&db, "latest").as_deref(), Some("3"));
    // Replayed logs are folded into tables; only the live log remains.
    assert_eq!(files_with_suffix(dir.path(), ".log").len(), 1);
}

// =============================================================================
// Test 3: A log bigger than the write buffer replays into several tables
// =============================================================================
#[test]
fn large_log_replays_into_tables() {
    let dir = TempDir::new().unwrap();
    let opts = Options {
        write_buffer_size: 1 << 20,
        ..options()
    };
    {
        let db = Db::open(dir.path(), opts.clone()).unwrap();
        let value = "z".repeat(1000);
        for i in 0..900 {
            put(&db, &format!("k{i:04}"), &value);
        }
    }
    // Reopen with a smaller buffer so replay has to flush part-way.
    let small = Options {
        write_buffer_size: 64 * 1024,
        ..options()
    };
    let db = Db::open(dir.path(), small).unwrap();
    for i in (0..900).step_by(41) {
        assert_eq!(get(&db, &format!("k{i:04}")).map(|v| v.len()), Some(1000));
    }
    // Everything replayed was written out; the new memtable starts empty.
    assert_eq!(db.property("stratadb.approximate-memory-usage").as_deref(), Some("0"));
    assert!(db.approximate_sizes(&[(b"k", b"l")])[0] > 800 * 1000);
}

// =============================================================================
// Test 4: Open flags for missing and existing databases
// =============================================================================
#[test]
fn create_if_missing_and_error_if_exists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    let err = Db::open(&path, Options::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

    drop(Db::open(&path, options()).unwrap());
    assert!(path.join("CURRENT").exists());

    let exclusive = Options {
        error_if_exists: true,
        ..options()
    };
    let err = Db::open(&path, exclusive).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

    // Existing databases open without create_if_missing.
    drop(Db::open(&path, Options::default()).unwrap());
}

// =============================================================================
// Test 5: A damaged log loses the damaged block unless checks are paranoid
// =============================================================================
#[test]
fn damaged_log_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open(dir.path(), options()).unwrap();
        let value = "v".repeat(100);
        put(&db, "k1", &value);
        put(&db, "k2", &value);
        put(&db, "k3", &value);
    }
    let logs = files_with_suffix(dir.path(), ".log");
    assert_eq!(logs.len(), 1);
    // Each record is a 7-byte header plus a 117-byte batch; this lands in
    // the value of the second one.
    let mut bytes = std::fs::read(&logs[0]).unwrap();
    bytes[124 + 7 + 60] ^= 0xff;
    std::fs::write(&logs[0], &bytes).unwrap();

    let paranoid = Options {
        paranoid_checks: true,
        ..options()
    };
    let err = Db::open(dir.path(), paranoid).unwrap_err();
    assert!(err.is_corruption(), "{err}");

    let db = Db::open(dir.path(), options()).unwrap();
    assert!(get(&db, "k1").is_some());
    assert_eq!(get(&db, "k2"), None);
    assert_eq!(get(&db, "k3"), None);
}

// =============================================================================
// Test 6: A table named by the manifest but missing fails the open
// =============================================================================
#[test]
fn missing_table_is_corruption() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open(dir.path(), options()).unwrap();
        put(&db, "k", "v");
        db.flush().unwrap();
    }
    for table in files_with_suffix(dir.path(), ".ldb") {
        std::fs::remove_file(table).unwrap();
    }
    let err = Db::open(dir.path(), options()).unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

// =============================================================================
// Test 7: Destroying removes the database but not foreign files
// =============================================================================
#[test]
fn destroy_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let db = Db::open(&path, options()).unwrap();
        put(&db, "k", "v");
        db.flush().unwrap();
    }
    destroy_db(&path, &Options::default()).unwrap();
    assert!(!path.exists());
    assert!(Db::open(&path, Options::default()).is_err());

    // Missing databases are already destroyed.
    destroy_db(&path, &Options::default()).unwrap();

    drop(Db::open(&path, options()).unwrap());
    std::fs::write(path.join("notes.txt"), "keep me").unwrap();
    destroy_db(&path, &Options::default()).unwrap();
    assert!(path.join("notes.txt").exists());
    assert!(!path.join("CURRENT").exists());
}

// =============================================================================
// Test 8: Repair rebuilds a lost manifest from tables and logs
// =============================================================================
#[test]
fn repair_after_lost_manifest() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open(dir.path(), options()).unwrap();
        for i in 0..100 {
            put(&db, &format!("table{i:03}"), "on disk");
        }
        db.flush().unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"log-only", b"in the log");
        batch.delete(b"table000");
        db.write(&WriteOptions::default(), batch).unwrap();
    }
    for manifest in files_with_suffix(dir.path(), "").into_iter().filter(|p| {
        let name = p.file_name().unwrap().to_str().unwrap();
        name.starts_with("MANIFEST-") || name == "CURRENT"
    }) {
        std::fs::remove_file(manifest).unwrap();
    }
    assert!(Db::open(dir.path(), Options::default()).is_err());

    repair_db(dir.path(), &Options::default()).unwrap();

    let db = Db::open(dir.path(), Options::default()).unwrap();
    assert_eq!(get(&db, "table050").as_deref(), Some("on disk"));
    assert_eq!(get(&db, "log-only").as_deref(), Some("in the log"));
    assert_eq!(get(&db, "table000"), None);
    assert_eq!(db.last_sequence(), 102);
    put(&db, "after-repair", "ok");
    assert_eq!(get(&db, "after-repair").as_deref(), Some("ok"));
}

// =============================================================================
// Test 9: Repair moves unreadable tables aside
// =============================================================================
#[test]
fn repair_archives_bad_tables() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open(dir.path(), options()).unwrap();
        put(&db, "good", "data");
        db.flush().unwrap();
    }
    std::fs::write(dir.path().join("000999.ldb"), vec![7u8; 300]).unwrap();

    repair_db(dir.path(), &Options::default()).unwrap();
    assert!(dir.path().join("lost").join("000999.ldb").exists());

    let db = Db::open(dir.path(), Options::default()).unwrap();
    assert_eq!(get(&db, "good").as_deref(), Some("data"));
    // New files are numbered past the archived one.
    put(&db, "more", "data");
    db.flush().unwrap();
    assert_eq!(get(&db, "more").as_deref(), Some("data"));
}

// =============================================================================
// Test 10: Repairing a missing database fails
// =============================================================================
#[test]
fn repair_missing_database() {
    let dir = TempDir::new().unwrap();
    let err = repair_db(dir.path().join("nothing-here"), &Options::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");

    let empty = dir.path().join("empty");
    std::fs::create_dir(&empty).unwrap();
    let err = repair_db(&empty, &Options::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}
