use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use stratadb::{Db, Options, ReadOptions, StorageIterator, WriteBatch, WriteOptions};

const N: usize = 1_000;
const VAL_SIZE: usize = 100;

fn options() -> Options {
    Options {
        create_if_missing: true,
        ..Options::default()
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("k{i:06}").into_bytes()
}

fn put_sequential(c: &mut Criterion) {
    c.bench_function("put_sequential_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let value = vec![b'x'; VAL_SIZE];
                for i in 0..N {
                    db.put(&WriteOptions::default(), &key(i), &value).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn put_batched(c: &mut Criterion) {
    c.bench_function("put_batched_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let value = vec![b'x'; VAL_SIZE];
                for chunk in 0..N / 100 {
                    let mut batch = WriteBatch::new();
                    for i in chunk * 100..(chunk + 1) * 100 {
                        batch.put(&key(i), &value);
                    }
                    db.write(&WriteOptions::default(), batch).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn get_memtable_hit(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path(), options()).unwrap();
    for i in 0..N {
        db.put(&WriteOptions::default(), &key(i), &[b'x'; VAL_SIZE]).unwrap();
    }
    let read = ReadOptions::new();

    c.bench_function("get_memtable_hit_1k", |b| {
        b.iter(|| {
            for i in 0..N {
                black_box(db.get(&read, &key(i)).unwrap());
            }
        });
    });
}

fn get_table_hit(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path(), options()).unwrap();
    for i in 0..N {
        db.put(&WriteOptions::default(), &key(i), &[b'x'; VAL_SIZE]).unwrap();
    }
    db.compact_range(None, None).unwrap();
    let read = ReadOptions::new();

    c.bench_function("get_table_hit_1k", |b| {
        b.iter(|| {
            for i in 0..N {
                black_box(db.get(&read, &key(i)).unwrap());
            }
        });
    });
}

fn get_table_miss(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path(), options()).unwrap();
    for i in 0..N {
        db.put(&WriteOptions::default(), &key(i * 2), &[b'x'; VAL_SIZE]).unwrap();
    }
    db.compact_range(None, None).unwrap();
    let read = ReadOptions::new();

    // Odd keys are absent; the bloom filter answers most of them.
    c.bench_function("get_table_miss_1k", |b| {
        b.iter(|| {
            for i in 0..N {
                black_box(db.get(&read, &key(i * 2 + 1)).unwrap());
            }
        });
    });
}

fn scan_all(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path(), options()).unwrap();
    for i in 0..N {
        db.put(&WriteOptions::default(), &key(i), &[b'x'; VAL_SIZE]).unwrap();
    }
    db.compact_range(None, None).unwrap();

    c.bench_function("scan_1k", |b| {
        b.iter(|| {
            let mut iter = db.iter(&ReadOptions::new()).unwrap();
            iter.seek_to_first().unwrap();
            let mut n = 0;
            while iter.is_valid() {
                n += iter.value().len();
                iter.next().unwrap();
            }
            black_box(n)
        });
    });
}

criterion_group!(
    benches,
    put_sequential,
    put_batched,
    get_memtable_hit,
    get_table_hit,
    get_table_miss,
    scan_all
);
criterion_main!(benches);
