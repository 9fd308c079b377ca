pub mod skiplist;

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{InternalKey, LookupKey, ParsedInternalKey, SequenceNumber, ValueType};
use skiplist::SkipList;

/// Result of a memtable point lookup that hit an entry for the user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(Vec<u8>),
    /// The newest visible entry is a tombstone.
    Deleted,
}

/// In-memory sorted buffer for writes. Wraps a SkipList keyed by internal key.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Deletes are stored as tombstone entries, not removals, because older
/// versions may exist in SSTables on disk.
///
/// The engine serializes writers; the lock only keeps readers from observing
/// a half-linked node.
pub struct MemTable {
    list: RwLock<SkipList>,
    cmp: InternalKeyComparator,
}

impl MemTable {
    pub fn new(cmp: InternalKeyComparator) -> Self {
        MemTable {
            list: RwLock::new(SkipList::new(cmp.clone())),
            cmp,
        }
    }

    /// Insert one entry. `(user_key, sequence)` pairs are unique.
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, user_key: &[u8], value: &[u8]) {
        let key = InternalKey::new(user_key, sequence, value_type);
        let value = match value_type {
            ValueType::Value => value.to_vec(),
            ValueType::Deletion => Vec::new(),
        };
        self.list.write().insert(key.encode().to_vec(), value);
    }

    /// Find the newest entry for `key.user_key()` with sequence <= the
    /// lookup sequence. `None` means the memtable holds nothing for the key.
    pub fn get(&self, key: &LookupKey) -> Option<LookupResult> {
        let list = self.list.read();
        let idx = list.find_greater_or_equal(key.internal_key())?;
        let entry = ParsedInternalKey::parse(list.key(idx)).ok()?;
        if self.cmp.compare_user(entry.user_key, key.user_key()) != Ordering::Equal {
            return None;
        }
        match entry.value_type {
            ValueType::Value => Some(LookupResult::Found(list.value(idx).to_vec())),
            ValueType::Deletion => Some(LookupResult::Deleted),
        }
    }

    /// Current memory usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.list.read().size_bytes()
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Iterator over internal keys in order. Holds the memtable alive.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            current: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }
}

/// Cursor over a memtable.
///
/// Node indices stay valid while the table lives, so the cursor only takes
/// the read lock while it moves; the current entry is copied out.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn set(&mut self, list: &SkipList, idx: Option<usize>) {
        self.current = idx;
        self.key.clear();
        self.value.clear();
        if let Some(i) = idx {
            self.key.extend_from_slice(list.key(i));
            self.value.extend_from_slice(list.value(i));
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        self.set(&list, list.first());
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        self.set(&list, list.find_last());
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        self.set(&list, list.find_greater_or_equal(target));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let next = self.current.and_then(|idx| list.next(idx));
        self.set(&list, next);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let prev = match self.current {
            Some(_) => list.find_less_than(&self.key),
            None => None,
        };
        self.set(&list, prev);
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}
