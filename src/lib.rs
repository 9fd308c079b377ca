//! # stratadb
//!
//! An embedded key-value storage engine using the Log-Structured
//! Merge-Tree design.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! Random writes become sequential appends; reads merge a handful of
//! sorted sources.
//!
//! ## Layout
//! * [`wal`]: write-ahead log framing, also used for the manifest
//! * [`memtable`]: in-memory sorted write buffer
//! * [`sstable`]: immutable sorted tables of checksummed blocks
//! * [`version`]: which tables make up each level, and compaction picking
//! * [`db`]: the engine tying it together
//!
//! ```no_run
//! use stratadb::{Db, Options, ReadOptions, WriteOptions};
//!
//! let db = Db::open("/tmp/example-db", Options { create_if_missing: true, ..Options::default() })?;
//! db.put(&WriteOptions::default(), b"key", b"value")?;
//! assert_eq!(db.get(&ReadOptions::new(), b"key")?, Some(b"value".to_vec()));
//! # Ok::<(), stratadb::Error>(())
//! ```

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod checksum;
pub mod coding;
pub mod comparator;
pub mod compress;
pub mod db;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod options;
pub mod reporter;
pub mod sstable;
pub mod table_cache;
pub mod types;
pub mod version;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::WriteBatch;
pub use comparator::{BytewiseComparator, Comparator};
pub use compress::{Codec, CodecRegistry, CompressionType};
pub use db::{destroy_db, repair_db, Db, DbIterator, Snapshot};
pub use error::{Error, Result};
pub use iterator::StorageIterator;
pub use options::{Options, ReadOptions, WriteOptions};
