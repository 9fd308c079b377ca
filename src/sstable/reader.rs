use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::cache::Cache;
use crate::checksum;
use crate::coding::decode_fixed32;
use crate::comparator::BytewiseComparator;
use crate::compress::NO_COMPRESSION_ID;
use crate::error::{Error, Result};
use crate::iterator::{BlockSource, StorageIterator, TwoLevelIterator};
use crate::reporter::CorruptionKind;
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::footer::{BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use crate::sstable::{TableOptions, FILTER_BLOCK_NAME};

/// Uncompressed blocks keyed by (table cache id, block offset).
pub type BlockCache = Cache<(u64, u64), Block>;

/// An opened table file. Supports point lookups and range scans, and is
/// safe to share between threads.
///
/// On open:
/// 1. Read footer (last 48 bytes) → find index and metaindex blocks
/// 2. Read the index block and keep it in memory
/// 3. Read and deserialize the bloom filter, if the table has one
/// 4. Ready for queries (data blocks read on demand, through the cache)
pub struct Table {
    file: TableFile,
    options: TableOptions,
    index_block: Block,
    metaindex_handle: BlockHandle,
    filter: Option<BloomFilter>,
    block_cache: Option<Arc<BlockCache>>,
    cache_id: u64,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("path", &self.file.path)
            .field("size", &self.file.size)
            .field("cache_id", &self.cache_id)
            .finish_non_exhaustive()
    }
}

struct TableFile {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl TableFile {
    /// Read one block and its trailer, check the checksum and decompress.
    ///
    /// A checksum mismatch is reported; it fails the read only when
    /// `verify` (or paranoid checking) is on.
    fn read_block(&self, options: &TableOptions, handle: &BlockHandle, verify: bool) -> Result<Bytes> {
        let n = handle.size as usize;
        let in_bounds = handle
            .offset
            .checked_add(handle.size)
            .and_then(|end| end.checked_add(BLOCK_TRAILER_SIZE as u64))
            .is_some_and(|end| end <= self.size);
        if !in_bounds {
            return Err(Error::corruption("block handle points past end of file"));
        }

        let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(handle.offset))?;
            if let Err(e) = file.read_exact(&mut buf) {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Err(Error::corruption("truncated block read"));
                }
                return Err(e.into());
            }
        }

        let expected = checksum::unmask(decode_fixed32(&buf[n + 1..]));
        let actual = checksum::value(&buf[..n + 1]);
        if expected != actual {
            let verify = verify || options.paranoid_checks;
            let kind = if verify {
                CorruptionKind::Unrecoverable
            } else {
                CorruptionKind::Recoverable
            };
            options
                .reporter
                .report(kind, handle.offset, n + BLOCK_TRAILER_SIZE, "block checksum mismatch");
            if verify {
                return Err(Error::corruption(format!(
                    "{}: block checksum mismatch at offset {}",
                    self.path.display(),
                    handle.offset
                )));
            }
        }

        let compression_id = buf[n];
        buf.truncate(n);
        if compression_id == NO_COMPRESSION_ID {
            return Ok(Bytes::from(buf));
        }
        let codec = options.codecs.get(compression_id)?;
        Ok(Bytes::from(codec.decompress(&buf)?))
    }

    /// A damaged filter only costs lookups their shortcut.
    fn read_filter(&self, options: &TableOptions, metaindex_handle: &BlockHandle) -> Option<BloomFilter> {
        let load = || -> Result<Option<BloomFilter>> {
            let metaindex = Block::new(self.read_block(options, metaindex_handle, true)?)?;
            let mut iter = metaindex.iter(Arc::new(BytewiseComparator));
            iter.seek(FILTER_BLOCK_NAME)?;
            if !iter.is_valid() || iter.key() != FILTER_BLOCK_NAME {
                return Ok(None);
            }
            let handle = BlockHandle::decode(iter.value())?;
            let data = self.read_block(options, &handle, true)?;
            Ok(Some(BloomFilter::deserialize(&data)?))
        };
        match load() {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(table = %self.path.display(), error = %e, "ignoring unreadable filter block");
                None
            }
        }
    }
}

impl Table {
    /// Open a table of `file_size` bytes. A file too short to hold a footer,
    /// or whose footer does not carry the table magic, is `Corruption`.
    pub fn open(
        path: &Path,
        file_size: u64,
        options: TableOptions,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        if file_size < Footer::ENCODED_LENGTH as u64 {
            return Err(Error::corruption(format!(
                "{}: file is too short to be an sstable",
                path.display()
            )));
        }

        let mut file = File::open(path)?;
        let mut footer_buf = vec![0u8; Footer::ENCODED_LENGTH];
        file.seek(SeekFrom::Start(file_size - Footer::ENCODED_LENGTH as u64))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let file = TableFile {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: file_size,
        };
        let index_block = Block::new(file.read_block(&options, &footer.index_handle, true)?)?;
        let filter = file.read_filter(&options, &footer.metaindex_handle);
        let cache_id = block_cache.as_ref().map_or(0, |c| c.new_id());
        Ok(Table {
            file,
            options,
            index_block,
            metaindex_handle: footer.metaindex_handle,
            filter,
            block_cache,
            cache_id,
        })
    }

    /// Fetch a data block, going through the block cache when there is one.
    fn block(&self, handle: &BlockHandle, verify: bool, fill_cache: bool) -> Result<Block> {
        let load = || Block::new(self.file.read_block(&self.options, handle, verify)?);
        let Some(cache) = &self.block_cache else {
            return load();
        };
        let key = (self.cache_id, handle.offset);
        if fill_cache {
            cache.get_or_insert_with(&key, load)
        } else {
            match cache.get(&key) {
                Some(block) => Ok(block),
                None => load(),
            }
        }
    }

    /// Iterator over the data block an index entry points at.
    pub fn block_iter(&self, index_value: &[u8], verify: bool, fill_cache: bool) -> Result<BlockIter> {
        let handle = BlockHandle::decode(index_value)?;
        let block = self.block(&handle, verify, fill_cache)?;
        Ok(block.iter(Arc::clone(&self.options.comparator)))
    }

    /// False when the filter rules `key` out. Tables without a filter never
    /// rule anything out.
    pub fn key_may_match(&self, key: &[u8]) -> bool {
        match &self.filter {
            Some(filter) => filter.may_contain(self.options.filter_key(key)),
            None => true,
        }
    }

    /// Point lookup: the first entry at or after `key` in the only block
    /// that could hold `key`. The caller decides whether it matches.
    ///
    /// Algorithm:
    /// 1. Consult the bloom filter → definitely absent means `None`
    /// 2. Seek the index → find the right data block
    /// 3. Read that block (cache first)
    /// 4. Seek within the block
    pub fn get(&self, key: &[u8], verify: bool, fill_cache: bool) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.key_may_match(key) {
            return Ok(None);
        }
        let mut index = self.index_block.iter(Arc::clone(&self.options.comparator));
        index.seek(key)?;
        if !index.is_valid() {
            return Ok(None);
        }
        let mut block = self.block_iter(index.value(), verify, fill_cache)?;
        block.seek(key)?;
        if !block.is_valid() {
            return Ok(None);
        }
        Ok(Some((block.key().to_vec(), block.value().to_vec())))
    }

    /// Iterator over every entry in the table. Holds the table alive.
    pub fn iter(self: &Arc<Self>, verify: bool, fill_cache: bool) -> TableIterator {
        let index = self.index_block.iter(Arc::clone(&self.options.comparator));
        TwoLevelIterator::new(
            index,
            TableBlocks {
                table: Arc::clone(self),
                verify,
                fill_cache,
            },
        )
    }

    /// Approximate file offset at which entries for `key` begin. Keys past
    /// the last entry map to the start of the metaindex block.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index = self.index_block.iter(Arc::clone(&self.options.comparator));
        if index.seek(key).is_ok() && index.is_valid() {
            if let Ok(handle) = BlockHandle::decode(index.value()) {
                return handle.offset;
            }
        }
        self.metaindex_handle.offset
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn file_size(&self) -> u64 {
        self.file.size
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// Opens data blocks for a table iterator.
pub struct TableBlocks {
    table: Arc<Table>,
    verify: bool,
    fill_cache: bool,
}

impl BlockSource for TableBlocks {
    fn open(&self, index_value: &[u8]) -> Result<Box<dyn StorageIterator>> {
        Ok(Box::new(self.table.block_iter(index_value, self.verify, self.fill_cache)?))
    }
}

pub type TableIterator = TwoLevelIterator<BlockIter, TableBlocks>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::TableBuilder;
    use tempfile::tempdir;

    fn build(path: &Path, options: TableOptions, n: u32) -> u64 {
        let mut builder = TableBuilder::create(path, options).unwrap();
        for i in 0..n {
            builder
                .add(format!("key_{:05}", i).as_bytes(), format!("val_{i}").as_bytes())
                .unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn get_finds_every_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ldb");
        let size = build(&path, TableOptions::default(), 500);
        let table = Table::open(&path, size, TableOptions::default(), None).unwrap();
        assert!(table.has_filter());
        for i in 0..500u32 {
            let key = format!("key_{:05}", i);
            let (k, v) = table.get(key.as_bytes(), true, true).unwrap().unwrap();
            assert_eq!(k, key.as_bytes());
            assert_eq!(v, format!("val_{i}").as_bytes());
        }
    }

    #[test]
    fn short_file_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ldb");
        std::fs::write(&path, b"tiny").unwrap();
        let err = Table::open(&path, 4, TableOptions::default(), None).err().unwrap();
        assert!(err.is_corruption());
    }
}
