use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::reporter::{CorruptionKind, CorruptionReporter};
use crate::wal::record::{ChunkHeader, RecordType};
use crate::wal::{BLOCK_SIZE, HEADER_SIZE};

/// Outcome of reading one physical chunk.
enum Physical {
    Chunk(u8, Range<usize>),
    Eof,
    /// Checksum mismatch, zero-filled region, or a chunk before the initial
    /// offset. Already reported where appropriate.
    Bad,
}

/// Reassembles logical records from a log file.
///
/// Damaged chunks are reported to the corruption reporter. In the default
/// best-effort mode the rest of the damaged block is skipped and reading
/// continues; in strict mode the first corruption fails the read.
///
/// A torn tail (the writer died before finishing the last record) is treated
/// as the end of the log, not as corruption.
pub struct LogReader<R> {
    file: R,
    reporter: Option<Arc<dyn CorruptionReporter>>,
    verify_checksums: bool,
    strict: bool,

    backing: Vec<u8>,
    /// Unconsumed part of `backing`.
    buffer: Range<usize>,
    eof: bool,

    /// Offset of the first byte past `backing`'s contents.
    end_of_buffer_offset: u64,
    /// Offset of the last record returned by `read_record`.
    last_record_offset: u64,
    initial_offset: u64,
    /// Skipping `Middle`/`Last` chunks after seeking to `initial_offset`.
    resyncing: bool,
    failed: bool,
}

impl LogReader<BufReader<File>> {
    /// Open a log file for reading from the start.
    pub fn open(path: &Path, reporter: Option<Arc<dyn CorruptionReporter>>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(LogReader::new(BufReader::new(file), reporter, true, 0))
    }
}

impl<R: Read + Seek> LogReader<R> {
    /// Create a reader that returns the first record starting at or after
    /// `initial_offset`.
    pub fn new(
        file: R,
        reporter: Option<Arc<dyn CorruptionReporter>>,
        verify_checksums: bool,
        initial_offset: u64,
    ) -> Self {
        LogReader {
            file,
            reporter,
            verify_checksums,
            strict: false,
            backing: vec![0u8; BLOCK_SIZE],
            buffer: 0..0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
            failed: false,
        }
    }

    /// Fail on the first corruption instead of skipping past it.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Offset of the last record returned by [`read_record`](Self::read_record).
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Read the next logical record. `Ok(None)` marks the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.last_record_offset < self.initial_offset {
            self.skip_to_initial_block()?;
        }

        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;
        // Offset of the first chunk of the record being assembled.
        let mut prospective_record_offset = 0u64;

        loop {
            let physical = self.read_physical_record()?;
            let (record_type, range) = match physical {
                Physical::Chunk(t, range) => (t, range),
                Physical::Eof => {
                    // A partial record at EOF means the writer died mid-record;
                    // the tail is dropped silently.
                    return Ok(None);
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report_corruption(scratch.len(), "error in middle of record")?;
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                    continue;
                }
            };

            // `buffer.start` already points past this chunk.
            let physical_record_offset = self.end_of_buffer_offset
                - (self.buffer.len() + HEADER_SIZE + range.len()) as u64;

            if self.resyncing {
                match RecordType::from_u8(record_type) {
                    Some(RecordType::Middle) => continue,
                    Some(RecordType::Last) => {
                        self.resyncing = false;
                        continue;
                    }
                    _ => self.resyncing = false,
                }
            }

            match RecordType::from_u8(record_type) {
                Some(RecordType::Full) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report_corruption(scratch.len(), "partial record without end(1)")?;
                    }
                    self.last_record_offset = physical_record_offset;
                    return Ok(Some(self.backing[range].to_vec()));
                }
                Some(RecordType::First) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report_corruption(scratch.len(), "partial record without end(2)")?;
                    }
                    prospective_record_offset = physical_record_offset;
                    scratch.clear();
                    scratch.extend_from_slice(&self.backing[range]);
                    in_fragmented_record = true;
                }
                Some(RecordType::Middle) => {
                    if in_fragmented_record {
                        scratch.extend_from_slice(&self.backing[range]);
                    } else {
                        self.report_corruption(
                            range.len(),
                            "missing start of fragmented record(1)",
                        )?;
                    }
                }
                Some(RecordType::Last) => {
                    if in_fragmented_record {
                        scratch.extend_from_slice(&self.backing[range]);
                        self.last_record_offset = prospective_record_offset;
                        return Ok(Some(scratch));
                    }
                    self.report_corruption(range.len(), "missing start of fragmented record(2)")?;
                }
                Some(RecordType::Zero) | None => {
                    let dropped = range.len() + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report_corruption(
                        dropped,
                        &format!("unknown record type {record_type}"),
                    )?;
                    in_fragmented_record = false;
                    scratch.clear();
                }
            }
        }
    }

    /// Position the file at the start of the block containing
    /// `initial_offset`.
    fn skip_to_initial_block(&mut self) -> Result<()> {
        let offset_in_block = (self.initial_offset % BLOCK_SIZE as u64) as usize;
        let mut block_start = self.initial_offset - offset_in_block as u64;

        // An offset inside a block trailer belongs to the next block.
        if offset_in_block > BLOCK_SIZE - (HEADER_SIZE - 1) {
            block_start += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start;

        if block_start > 0 {
            if let Err(e) = self.file.seek(SeekFrom::Start(block_start)) {
                self.report_drop(block_start as usize, &e.to_string(), CorruptionKind::Unrecoverable);
                return Err(e.into());
            }
        }
        self.last_record_offset = self.initial_offset;
        Ok(())
    }

    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            if self.buffer.len() < HEADER_SIZE {
                if self.eof {
                    // A truncated header at the end of the file is the writer
                    // dying mid-header, not corruption.
                    self.buffer = 0..0;
                    return Ok(Physical::Eof);
                }

                // The previous block is exhausted (any remainder is padding).
                match read_full(&mut self.file, &mut self.backing) {
                    Ok(n) => {
                        self.buffer = 0..n;
                        self.end_of_buffer_offset += n as u64;
                        if n < BLOCK_SIZE {
                            self.eof = true;
                        }
                    }
                    Err(e) => {
                        self.buffer = 0..0;
                        self.eof = true;
                        self.report_drop(BLOCK_SIZE, &e.to_string(), CorruptionKind::Unrecoverable);
                        return Err(e.into());
                    }
                }
                continue;
            }

            let start = self.buffer.start;
            let header = ChunkHeader::decode(&self.backing[start..start + HEADER_SIZE]);
            let length = header.length as usize;

            if HEADER_SIZE + length > self.buffer.len() {
                let drop_size = self.buffer.len();
                self.buffer = 0..0;
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length")?;
                    return Ok(Physical::Bad);
                }
                // The writer died after the header but before the payload.
                return Ok(Physical::Eof);
            }

            if header.record_type == RecordType::Zero as u8 && length == 0 {
                // Zero-filled region from preallocation: skip without
                // reporting.
                self.buffer = 0..0;
                return Ok(Physical::Bad);
            }

            let payload = start + HEADER_SIZE..start + HEADER_SIZE + length;
            if self.verify_checksums && !header.verify(&self.backing[payload.clone()]) {
                // The length itself may be what got damaged, so drop the whole
                // rest of the block rather than trusting it.
                let drop_size = self.buffer.len();
                self.buffer = 0..0;
                self.report_corruption(drop_size, "checksum mismatch")?;
                return Ok(Physical::Bad);
            }

            self.buffer.start += HEADER_SIZE + length;

            // Skip chunks that started before the initial offset.
            let chunk_offset =
                self.end_of_buffer_offset - (self.buffer.len() + HEADER_SIZE + length) as u64;
            if chunk_offset < self.initial_offset {
                return Ok(Physical::Bad);
            }

            return Ok(Physical::Chunk(header.record_type, payload));
        }
    }

    /// Report `bytes` of damage. Errors in strict mode.
    fn report_corruption(&mut self, bytes: usize, reason: &str) -> Result<()> {
        let kind = if self.strict {
            CorruptionKind::Unrecoverable
        } else {
            CorruptionKind::Recoverable
        };
        self.report_drop(bytes, reason, kind);
        if self.strict {
            return Err(Error::corruption(format!("log: {reason}")));
        }
        Ok(())
    }

    fn report_drop(&self, bytes: usize, reason: &str, kind: CorruptionKind) {
        let position = self
            .end_of_buffer_offset
            .saturating_sub((self.buffer.len() + bytes) as u64);
        if let Some(reporter) = &self.reporter {
            if position + bytes as u64 >= self.initial_offset {
                reporter.report(kind, position, bytes, reason);
            }
        }
    }
}

/// Records as a lazy sequence; stops after the first error.
impl<R: Read + Seek> Iterator for LogReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` unless the reader hits EOF first; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
