use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::wal::record::{ChunkHeader, RecordType};
use crate::wal::{BLOCK_SIZE, HEADER_SIZE};

/// Appends framed records to a log file.
///
/// Every record is pushed to the OS when `add_record` returns; it is only
/// durable once `sync` has been called.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_data()   → OS page cache → physical disk
pub struct LogWriter {
    writer: BufWriter<File>,
    /// Position inside the current physical block.
    block_offset: usize,
    /// Total bytes in the file.
    offset: u64,
}

impl LogWriter {
    /// Create (or truncate) a log file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(file, 0))
    }

    /// Reopen an existing log and continue appending after its last byte.
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::new(file, len))
    }

    /// Wrap a file that already holds `existing_len` bytes of log data.
    pub fn new(file: File, existing_len: u64) -> Self {
        LogWriter {
            writer: BufWriter::new(file),
            block_offset: (existing_len % BLOCK_SIZE as u64) as usize,
            offset: existing_len,
        }
    }

    /// Append one logical record, fragmenting it across blocks as needed.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record;
        let mut begin = true;

        // An empty record still emits a single zero-length Full chunk.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Never split a header across blocks: pad the trailer with zeros.
                if leftover > 0 {
                    self.write(&[0u8; HEADER_SIZE][..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(avail);
            let end = fragment_len == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            let (fragment, rest) = left.split_at(fragment_len);
            self.emit_physical_record(record_type, fragment)?;
            left = rest;
            begin = false;

            if end {
                break;
            }
        }

        self.writer.flush()?;
        Ok(())
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);
        let header = ChunkHeader::for_payload(record_type, payload);
        self.write(&header.encode())?;
        self.write(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
