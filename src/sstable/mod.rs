//! Immutable sorted table files.
//!
//! ```text
//! ┌─────────────────────┐
//! │ data block 0        │  each block followed by a 5-byte trailer
//! │ ...                 │
//! │ data block N        │
//! │ filter block        │  optional bloom filter over user keys
//! │ metaindex block     │  "filter.stratadb.Bloom" → filter handle
//! │ index block         │  separator key → data block handle
//! │ footer (48 bytes)   │
//! └─────────────────────┘
//! ```

pub mod block;
pub mod builder;
pub mod footer;
pub mod reader;

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use crate::compress::{CodecRegistry, CompressionType};
use crate::options::Options;
use crate::reporter::{CorruptionReporter, LogReporter};
use crate::types::extract_user_key;

pub use builder::TableBuilder;
pub use footer::{BlockHandle, Footer};
pub use reader::{BlockCache, Table, TableIterator};

/// Metaindex key of the bloom filter block.
pub const FILTER_BLOCK_NAME: &[u8] = b"filter.stratadb.Bloom";

/// Settings shared by table writers and readers.
#[derive(Clone)]
pub struct TableOptions {
    /// Orders the keys stored in the table.
    pub comparator: Arc<dyn Comparator>,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: CompressionType,
    pub codecs: Arc<CodecRegistry>,
    pub bloom_false_positive_rate: Option<f64>,
    /// Keys are internal keys: filters cover only the user key part.
    pub internal_keys: bool,
    /// Always verify checksums of blocks read from this table.
    pub paranoid_checks: bool,
    pub reporter: Arc<dyn CorruptionReporter>,
}

impl TableOptions {
    /// Table settings for a database's data files.
    pub fn for_db(options: &Options, icmp: &InternalKeyComparator) -> Self {
        TableOptions {
            comparator: Arc::new(icmp.clone()),
            block_size: options.block_size,
            block_restart_interval: options.block_restart_interval,
            compression: options.compression,
            codecs: Arc::clone(&options.codecs),
            bloom_false_positive_rate: options.bloom_false_positive_rate,
            internal_keys: true,
            paranoid_checks: options.paranoid_checks,
            reporter: Arc::new(LogReporter::new("table")),
        }
    }

    /// Key bytes the bloom filter is built over.
    pub(crate) fn filter_key<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        if self.internal_keys && key.len() >= 8 {
            extract_user_key(key)
        } else {
            key
        }
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            comparator: Arc::new(BytewiseComparator),
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            codecs: Arc::new(CodecRegistry::default()),
            bloom_false_positive_rate: Some(0.01),
            internal_keys: false,
            paranoid_checks: false,
            reporter: Arc::new(LogReporter::new("table")),
        }
    }
}
