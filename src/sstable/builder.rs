use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::bloom::BloomFilterBuilder;
use crate::checksum;
use crate::coding::put_fixed32;
use crate::comparator::BytewiseComparator;
use crate::compress::NO_COMPRESSION_ID;
use crate::error::{Error, Result};
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::{TableOptions, FILTER_BLOCK_NAME};

/// Builds a table file from a sorted stream of key-value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → table)
/// - Compaction (merged iterators → new tables)
///
/// Build process:
/// 1. Add entries one by one (must be in strictly increasing order)
/// 2. Entries fill up blocks; when a block reaches `block_size` it is
///    written out and an index entry is queued for it
/// 3. finish() flushes the last block, writes filter, metaindex, index and
///    footer, then fsyncs
pub struct TableBuilder {
    options: TableOptions,
    writer: BufWriter<File>,
    /// Bytes written so far.
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter: Option<BloomFilterBuilder>,
    last_key: Vec<u8>,
    num_entries: u64,
    /// Index entry for the last flushed block is held back until the next
    /// key is known, so its separator can be shortened.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    closed: bool,
}

impl TableBuilder {
    pub fn create(path: &Path, options: TableOptions) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(file, options))
    }

    pub fn new(file: File, options: TableOptions) -> Self {
        let data_block = BlockBuilder::new(options.block_restart_interval, Arc::clone(&options.comparator));
        // one entry per data block, so every index entry is a restart point
        let index_block = BlockBuilder::new(1, Arc::clone(&options.comparator));
        let filter = options.bloom_false_positive_rate.map(BloomFilterBuilder::new);
        TableBuilder {
            writer: BufWriter::new(file),
            offset: 0,
            data_block,
            index_block,
            filter,
            last_key: Vec::new(),
            num_entries: 0,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            closed: false,
            options,
        }
    }

    /// Add a key-value pair. Keys MUST arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_argument("table builder already finished"));
        }
        if self.num_entries > 0 && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater {
            return Err(Error::invalid_argument("table keys added out of order"));
        }

        if self.pending_index_entry {
            let separator = self
                .options
                .comparator
                .find_shortest_separator(&self.last_key, key);
            self.index_block.add(&separator, &self.pending_handle.encode())?;
            self.pending_index_entry = false;
        }

        if let Some(filter) = self.filter.as_mut() {
            filter.add_key(self.options.filter_key(key));
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value)?;

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write out the current data block, if it holds anything.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_argument("table builder already finished"));
        }
        if self.data_block.is_empty() {
            return Ok(());
        }
        let raw = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_block(&raw)?;
        self.pending_index_entry = true;
        self.writer.flush()?;
        Ok(())
    }

    /// Compress with the configured codec unless that saves less than 1/8
    /// of the block, then write it.
    fn write_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        let id = self.options.compression.id();
        if id != NO_COMPRESSION_ID {
            let codecs = Arc::clone(&self.options.codecs);
            let compressed = codecs.compress(id, raw)?;
            if compressed.len() < raw.len() - raw.len() / 8 {
                return self.write_raw_block(&compressed, id);
            }
        }
        self.write_raw_block(raw, NO_COMPRESSION_ID)
    }

    fn write_raw_block(&mut self, contents: &[u8], compression_id: u8) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.writer.write_all(contents)?;

        let crc = checksum::extend(checksum::value(contents), &[compression_id]);
        let mut trailer = Vec::with_capacity(5);
        trailer.push(compression_id);
        put_fixed32(&mut trailer, checksum::mask(crc));
        self.writer.write_all(&trailer)?;

        self.offset += (contents.len() + trailer.len()) as u64;
        Ok(handle)
    }

    /// Finalize the table: flush last block, write filter, metaindex, index
    /// and footer, fsync. Returns the file size.
    pub fn finish(&mut self) -> Result<u64> {
        self.flush()?;
        self.closed = true;

        let mut metaindex = BlockBuilder::new(
            self.options.block_restart_interval,
            Arc::new(BytewiseComparator),
        );
        if let Some(filter) = self.filter.take() {
            let encoded = filter.build()?.serialize();
            let handle = self.write_raw_block(&encoded, NO_COMPRESSION_ID)?;
            metaindex.add(FILTER_BLOCK_NAME, &handle.encode())?;
        }
        let metaindex_raw = metaindex.finish().to_vec();
        let metaindex_handle = self.write_block(&metaindex_raw)?;

        if self.pending_index_entry {
            let successor = self.options.comparator.find_short_successor(&self.last_key);
            self.index_block.add(&successor, &self.pending_handle.encode())?;
            self.pending_index_entry = false;
        }
        let index_raw = self.index_block.finish().to_vec();
        let index_handle = self.write_block(&index_raw)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += Footer::ENCODED_LENGTH as u64;

        // Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.offset)
    }

    /// Stop building; the caller deletes the partial file.
    pub fn abandon(&mut self) {
        self.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; the final size once finished.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
