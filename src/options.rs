use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::compress::{CodecRegistry, CompressionType};
use crate::db::Snapshot;
use crate::error::{Error, Result};

/// Configuration for opening a database.
///
/// Out-of-range sizes are clamped into their supported range when the
/// database is opened; values that cannot be coerced (a zero restart
/// interval, an unregistered codec) fail the open with `InvalidArgument`.
#[derive(Clone)]
pub struct Options {
    /// Orders user keys. Must keep the same name across reopenings.
    pub comparator: Arc<dyn Comparator>,
    /// Create the database if it does not exist.
    pub create_if_missing: bool,
    /// Fail if the database already exists.
    pub error_if_exists: bool,
    /// Turn any detected corruption during recovery or compaction into an
    /// error instead of skipping the damaged data.
    pub paranoid_checks: bool,
    /// Memtable size that triggers a switch to a new memtable (bytes).
    pub write_buffer_size: usize,
    /// Number of open tables kept in the table cache.
    pub max_open_files: usize,
    /// Bytes of uncompressed block data kept in the block cache.
    pub block_cache_size: usize,
    /// Approximate uncompressed size of a data block (bytes).
    pub block_size: usize,
    /// Number of entries between restart points in a block.
    pub block_restart_interval: usize,
    /// Table size at which compaction starts a new output file (bytes).
    pub max_file_size: u64,
    /// Codec for new blocks. Existing blocks keep whatever they were written
    /// with.
    pub compression: CompressionType,
    /// Codecs known to this database, by persisted id.
    pub codecs: Arc<CodecRegistry>,
    /// Target false positive rate of per-table bloom filters; `None` writes
    /// no filters.
    pub bloom_false_positive_rate: Option<f64>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comparator: Arc::new(BytewiseComparator),
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_cache_size: 8 * 1024 * 1024,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            max_file_size: 2 * 1024 * 1024,
            compression: CompressionType::None,
            codecs: Arc::new(CodecRegistry::default()),
            bloom_false_positive_rate: Some(0.01),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_cache_size", &self.block_cache_size)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("max_file_size", &self.max_file_size)
            .field("compression", &self.compression)
            .field("bloom_false_positive_rate", &self.bloom_false_positive_rate)
            .finish()
    }
}

fn clip<T: PartialOrd + Copy>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

impl Options {
    /// Clamp sizes into their supported ranges and reject settings that
    /// cannot work.
    pub fn sanitize(&self) -> Result<Options> {
        if self.block_restart_interval == 0 {
            return Err(Error::invalid_argument("block_restart_interval must be positive"));
        }
        if !self.codecs.contains(self.compression.id()) {
            return Err(Error::invalid_argument(format!(
                "compression codec {} is not registered",
                self.compression.id()
            )));
        }
        if let Some(rate) = self.bloom_false_positive_rate {
            if !(rate > 0.0 && rate < 1.0) {
                return Err(Error::invalid_argument(format!(
                    "bloom_false_positive_rate {rate} not in (0, 1)"
                )));
            }
        }

        let mut out = self.clone();
        out.max_open_files = clip(self.max_open_files, 64 + 10, 50_000);
        out.write_buffer_size = clip(self.write_buffer_size, 64 << 10, 1 << 30);
        out.max_file_size = clip(self.max_file_size, 1 << 20, 1 << 30);
        out.block_size = clip(self.block_size, 1 << 10, 4 << 20);
        Ok(out)
    }
}

/// Options that control a single read.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Verify block checksums; a mismatch fails the read.
    pub verify_checksums: bool,
    /// Keep blocks read by this operation in the block cache.
    pub fill_cache: bool,
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<Snapshot>,
}

impl ReadOptions {
    pub fn new() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

/// Options that control a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the log to stable storage before the write returns.
    pub sync: bool,
}
