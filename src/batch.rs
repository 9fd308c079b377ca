//! Atomic groups of updates.
//!
//! ```text
//! rep := sequence: fixed64, count: fixed32, record*
//! record := Value key:len-prefixed value:len-prefixed
//!         | Deletion key:len-prefixed
//! ```
//!
//! The same bytes are appended to the log as one record, so a batch is
//! either fully recovered or not at all.

use crate::coding::{decode_fixed32, decode_fixed64, put_length_prefixed_slice, SliceReader};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

/// sequence (8) + count (4)
pub const BATCH_HEADER_SIZE: usize = 12;

/// Receives the operations of a batch in order.
pub trait BatchHandler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            rep: vec![0u8; BATCH_HEADER_SIZE],
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Append every operation of `other`, in order.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Number of operations.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..12])
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Size of the encoded batch in bytes.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Replay the operations into `handler`. Fails on a malformed batch
    /// after delivering the operations before the damage.
    pub fn iterate<H: BatchHandler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        let mut input = &self.rep[BATCH_HEADER_SIZE..];
        let mut found = 0u32;
        while !input.is_empty() {
            let tag = input[0];
            input = &input[1..];
            match ValueType::try_from(tag) {
                Ok(ValueType::Value) => {
                    let key = input
                        .read_length_prefixed()
                        .map_err(|_| Error::corruption("bad WriteBatch Put"))?;
                    let value = input
                        .read_length_prefixed()
                        .map_err(|_| Error::corruption("bad WriteBatch Put"))?;
                    handler.put(key, value);
                }
                Ok(ValueType::Deletion) => {
                    let key = input
                        .read_length_prefixed()
                        .map_err(|_| Error::corruption("bad WriteBatch Delete"))?;
                    handler.delete(key);
                }
                Err(_) => return Err(Error::corruption("unknown WriteBatch tag")),
            }
            found += 1;
        }
        if found != self.count() {
            return Err(Error::corruption("WriteBatch has wrong count"));
        }
        Ok(())
    }

    /// Apply to `mem`, numbering operations from the batch's sequence.
    pub fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)
    }

    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[..8])
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    pub(crate) fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Rebuild a batch from a log record.
    pub(crate) fn from_contents(contents: Vec<u8>) -> Result<Self> {
        if contents.len() < BATCH_HEADER_SIZE {
            return Err(Error::corruption("log record too small for a WriteBatch"));
        }
        Ok(WriteBatch { rep: contents })
    }
}

struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    mem: &'a MemTable,
}

impl BatchHandler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, &[]);
        self.sequence += 1;
    }
}
