use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{put_fixed32, put_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// Keys are prefix-compressed against the previous key. Every
/// `restart_interval` entries the full key is stored instead and its offset
/// recorded as a restart point, so readers can binary search the restarts
/// and only decode forward from there.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────────┐
/// │ Entry: [shared(v32)][non_shared(v32)][value_len(v32)][key delta][value] │
/// │ ...                                                               │
/// ├──────────────────────────────────────────────────────────────────┤
/// │ Restart array: [restart_0(4B)][restart_1(4B)]...                  │
/// │ Num restarts (4B)                                                  │
/// └──────────────────────────────────────────────────────────────────┘
/// ```
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries emitted since the last restart.
    counter: usize,
    restart_interval: usize,
    finished: bool,
    last_key: Vec<u8>,
    cmp: Arc<dyn Comparator>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize, cmp: Arc<dyn Comparator>) -> Self {
        debug_assert!(restart_interval >= 1);
        BlockBuilder {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            finished: false,
            last_key: Vec::new(),
            cmp,
        }
    }

    /// Add a key-value pair. Keys must be strictly increasing and the block
    /// must not have been finished.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_argument("add called on a finished block"));
        }
        if !self.is_empty() && self.cmp.compare(key, &self.last_key) != Ordering::Greater {
            return Err(Error::invalid_argument("block keys out of order"));
        }

        let mut shared = 0;
        if self.counter < self.restart_interval {
            shared = self
                .last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count();
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
        Ok(())
    }

    /// Append the restart array and return the block contents. The slice
    /// stays valid until `reset`.
    pub fn finish(&mut self) -> &[u8] {
        if !self.finished {
            for &restart in &self.restarts {
                put_fixed32(&mut self.buffer, restart);
            }
            put_fixed32(&mut self.buffer, self.restarts.len() as u32);
            self.finished = true;
        }
        &self.buffer
    }

    /// Start a new block, as if freshly constructed.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Size of the block `finish` would produce right now.
    pub fn current_size_estimate(&self) -> usize {
        if self.finished {
            return self.buffer.len();
        }
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}
