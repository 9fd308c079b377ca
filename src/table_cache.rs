//! Open table handles, bounded by `max_open_files`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{Cache, EvictionListener};
use crate::db::filename::{sst_table_file_name, table_file_name};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::{BlockCache, Table, TableOptions};

/// Files kept open for purposes other than tables (logs, manifest, ...).
const NUM_NON_TABLE_CACHE_FILES: usize = 10;

/// Maps file numbers to open tables.
///
/// An evicted table stays usable by whoever still holds it; its file is
/// closed when the last reference drops.
pub struct TableCache {
    dbname: PathBuf,
    options: TableOptions,
    cache: Cache<u64, Arc<Table>>,
    block_cache: Arc<BlockCache>,
}

impl TableCache {
    pub fn new(dbname: &Path, options: TableOptions, max_open_files: usize, block_cache: Arc<BlockCache>) -> Self {
        let capacity = max_open_files.saturating_sub(NUM_NON_TABLE_CACHE_FILES).max(1);
        let listener: EvictionListener<u64, Arc<Table>> = Arc::new(|number: &u64, _table: &Arc<Table>| {
            tracing::trace!(file = number, "table evicted from cache");
        });
        TableCache {
            dbname: dbname.to_path_buf(),
            options,
            cache: Cache::with_listener(capacity, Some(listener)),
            block_cache,
        }
    }

    /// Return the open table for `file_number`, opening it on a miss.
    pub fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        self.cache.get_or_insert_with(&file_number, || {
            let path = table_file_name(&self.dbname, file_number);
            let table = match Table::open(&path, file_size, self.options.clone(), Some(Arc::clone(&self.block_cache))) {
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    let legacy = sst_table_file_name(&self.dbname, file_number);
                    Table::open(&legacy, file_size, self.options.clone(), Some(Arc::clone(&self.block_cache)))
                        .map_err(|_| Error::NotFound(path.display().to_string()))?
                }
                other => other?,
            };
            tracing::debug!(file = file_number, size = file_size, "opened table");
            Ok(Arc::new(table))
        })
    }

    /// See [`Table::get`].
    pub fn get(
        &self,
        file_number: u64,
        file_size: u64,
        key: &[u8],
        verify: bool,
        fill_cache: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.find_table(file_number, file_size)?.get(key, verify, fill_cache)
    }

    pub fn iter(&self, file_number: u64, file_size: u64, verify: bool, fill_cache: bool) -> Result<Box<dyn StorageIterator>> {
        let table = self.find_table(file_number, file_size)?;
        Ok(Box::new(table.iter(verify, fill_cache)))
    }

    pub fn approximate_offset_of(&self, file_number: u64, file_size: u64, key: &[u8]) -> Result<u64> {
        Ok(self.find_table(file_number, file_size)?.approximate_offset_of(key))
    }

    /// Forget a table whose file is being deleted.
    pub fn evict(&self, file_number: u64) {
        self.cache.remove(&file_number);
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn block_cache(&self) -> &Arc<BlockCache> {
        &self.block_cache
    }
}
