use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

use crate::coding::{decode_fixed32, SliceReader};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

/// A decoded, immutable block. Cheap to clone; iterators share the bytes.
#[derive(Clone, Debug)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Wrap block contents (without the compression/checksum trailer).
    pub fn new(data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::corruption("empty block"));
        }
        if data.len() < 4 {
            return Err(Error::corruption("block too short for restart count"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(Error::corruption("bad restart count"));
        }
        Ok(Block {
            restart_offset: data.len() - (1 + num_restarts) * 4,
            num_restarts,
            data,
        })
    }

    /// Size of the block contents in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, cmp: Arc<dyn Comparator>) -> BlockIter {
        BlockIter {
            cmp,
            data: self.data.clone(),
            restarts: self.restart_offset,
            num_restarts: self.num_restarts,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value: 0..0,
        }
    }
}

/// Bidirectional cursor over one block.
pub struct BlockIter {
    cmp: Arc<dyn Comparator>,
    data: Bytes,
    /// Offset of the restart array.
    restarts: usize,
    num_restarts: usize,
    /// Offset of the current entry; `restarts` when invalid.
    current: usize,
    /// Restart block containing `current`.
    restart_index: usize,
    key: Vec<u8>,
    value: Range<usize>,
}

/// Decoded entry header: (shared, non_shared, value_len, header bytes).
fn decode_entry(data: &[u8]) -> Result<(usize, usize, usize, usize)> {
    let mut input = data;
    let shared = input.read_varint32()? as usize;
    let non_shared = input.read_varint32()? as usize;
    let value_len = input.read_varint32()? as usize;
    let header_len = data.len() - input.len();
    if input.len() < non_shared + value_len {
        return Err(Error::corruption("block entry overruns block"));
    }
    Ok((shared, non_shared, value_len, header_len))
}

impl BlockIter {
    fn restart_point(&self, index: usize) -> usize {
        decode_fixed32(&self.data[self.restarts + index * 4..]) as usize
    }

    fn next_entry_offset(&self) -> usize {
        self.value.end
    }

    fn invalidate(&mut self) {
        self.current = self.restarts;
        self.restart_index = self.num_restarts;
        self.key.clear();
        self.value = 0..0;
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        // parse_next_key starts at value.end
        let offset = self.restart_point(index);
        self.value = offset..offset;
    }

    /// Decode the entry at `next_entry_offset`. Returns false past the end.
    fn parse_next_key(&mut self) -> Result<bool> {
        self.current = self.next_entry_offset();
        if self.current >= self.restarts {
            self.invalidate();
            return Ok(false);
        }

        let (shared, non_shared, value_len, header_len) =
            match decode_entry(&self.data[self.current..self.restarts]) {
                Ok(entry) if entry.0 <= self.key.len() => entry,
                Ok(_) => {
                    self.invalidate();
                    return Err(Error::corruption("bad shared prefix in block entry"));
                }
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };

        let key_start = self.current + header_len;
        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.data[key_start..key_start + non_shared]);
        let value_start = key_start + non_shared;
        self.value = value_start..value_start + value_len;

        while self.restart_index + 1 < self.num_restarts
            && self.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }

    /// Full key stored at a restart point.
    fn restart_key(&self, index: usize) -> Result<&[u8]> {
        let offset = self.restart_point(index);
        if offset >= self.restarts {
            return Err(Error::corruption("restart point past end of block"));
        }
        let (shared, non_shared, _, header_len) =
            decode_entry(&self.data[offset..self.restarts])?;
        if shared != 0 {
            return Err(Error::corruption("restart entry with shared prefix"));
        }
        let start = offset + header_len;
        Ok(&self.data[start..start + non_shared])
    }
}

impl StorageIterator for BlockIter {
    fn is_valid(&self) -> bool {
        self.current < self.restarts
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(0);
        self.parse_next_key()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_key()? && self.next_entry_offset() < self.restarts {}
        Ok(())
    }

    /// Binary search for the last restart point whose key is <= target, then
    /// scan forward to the first entry >= target.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        let mut left = 0;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let ord = match self.restart_key(mid) {
                Ok(mid_key) => self.cmp.compare(mid_key, target),
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if ord == Ordering::Greater {
                right = mid - 1;
            } else {
                left = mid;
            }
        }

        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key()? {
                return Ok(());
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
    }

    fn next(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        self.parse_next_key()?;
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        let original = self.current;
        while self.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.invalidate();
                return Ok(());
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key()? && self.next_entry_offset() < original {}
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.data[self.value.clone()]
    }
}
