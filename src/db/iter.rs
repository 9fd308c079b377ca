use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::{MergingIterator, StorageIterator};
use crate::types::{extract_user_key, InternalKey, ParsedInternalKey, SequenceNumber, ValueType, VALUE_TYPE_FOR_SEEK};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// `iter` sits at the current entry.
    Forward,
    /// `iter` sits just before all entries of the current user key, which
    /// is cached in `saved_key`/`saved_value`.
    Reverse,
}

/// Iterator over the user-visible contents of the database at one sequence
/// number: one entry per live user key, newest visible value, tombstoned
/// keys skipped.
pub struct DbIterator {
    user_cmp: Arc<dyn Comparator>,
    iter: MergingIterator,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    /// Keeps the files under `iter` from being deleted.
    _version: Arc<Version>,
}

impl DbIterator {
    pub(crate) fn new(
        user_cmp: Arc<dyn Comparator>,
        iter: MergingIterator,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> Self {
        DbIterator {
            user_cmp,
            iter,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            _version: version,
        }
    }

    fn clear_saved(&mut self) {
        self.saved_key.clear();
        self.saved_value.clear();
    }

    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        debug_assert!(self.iter.is_valid());
        debug_assert_eq!(self.direction, Direction::Forward);
        loop {
            let ikey = ParsedInternalKey::parse(self.iter.key())?;
            if ikey.sequence <= self.sequence {
                match ikey.value_type {
                    ValueType::Deletion => {
                        // Hide every older entry for this user key.
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(ikey.user_key);
                        skipping = true;
                    }
                    ValueType::Value => {
                        let hidden = skipping
                            && self.user_cmp.compare(ikey.user_key, &self.saved_key) != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return Ok(());
                        }
                    }
                }
            }
            self.iter.next()?;
            if !self.iter.is_valid() {
                break;
            }
        }
        self.saved_key.clear();
        self.valid = false;
        Ok(())
    }

    fn find_prev_user_entry(&mut self) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut value_type = ValueType::Deletion;
        while self.iter.is_valid() {
            let ikey = ParsedInternalKey::parse(self.iter.key())?;
            if ikey.sequence <= self.sequence {
                if value_type != ValueType::Deletion
                    && self.user_cmp.compare(ikey.user_key, &self.saved_key) == Ordering::Less
                {
                    // Passed the newest visible entry of the previous key.
                    break;
                }
                value_type = ikey.value_type;
                match value_type {
                    ValueType::Deletion => {
                        self.saved_key.clear();
                        self.saved_value.clear();
                    }
                    ValueType::Value => {
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(ikey.user_key);
                        self.saved_value.clear();
                        self.saved_value.extend_from_slice(self.iter.value());
                    }
                }
            }
            self.iter.prev()?;
        }

        if value_type == ValueType::Deletion {
            // Ran off the beginning.
            self.valid = false;
            self.clear_saved();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
        Ok(())
    }
}

impl StorageIterator for DbIterator {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        self.clear_saved();
        self.iter.seek_to_first()?;
        if self.iter.is_valid() {
            self.find_next_user_entry(false)
        } else {
            self.valid = false;
            Ok(())
        }
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        self.clear_saved();
        self.iter.seek_to_last()?;
        self.find_prev_user_entry()
    }

    /// Position at the first user key >= `target`.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.direction = Direction::Forward;
        self.clear_saved();
        let key = InternalKey::new(target, self.sequence, VALUE_TYPE_FOR_SEEK);
        self.iter.seek(key.encode())?;
        if self.iter.is_valid() {
            self.find_next_user_entry(false)
        } else {
            self.valid = false;
            Ok(())
        }
    }

    fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // `iter` is just before the entries of key(); step into them.
            // saved_key already holds the key to skip.
            if self.iter.is_valid() {
                self.iter.next()?;
            } else {
                self.iter.seek_to_first()?;
            }
        } else {
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.iter.key()));
            self.iter.next()?;
        }
        if !self.iter.is_valid() {
            self.valid = false;
            self.saved_key.clear();
            return Ok(());
        }
        self.find_next_user_entry(true)
    }

    fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Forward {
            // Back up to just before every entry of the current key.
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.iter.key()));
            loop {
                self.iter.prev()?;
                if !self.iter.is_valid() {
                    self.valid = false;
                    self.clear_saved();
                    return Ok(());
                }
                if self.user_cmp.compare(extract_user_key(self.iter.key()), &self.saved_key) == Ordering::Less {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    fn key(&self) -> &[u8] {
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    fn value(&self) -> &[u8] {
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{BytewiseComparator, InternalKeyComparator};
    use crate::iterator::collect_entries;
    use crate::memtable::MemTable;

    fn db_iter(entries: &[(&str, u64, ValueType, &str)], sequence: SequenceNumber) -> DbIterator {
        let ucmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let icmp = InternalKeyComparator::new(Arc::clone(&ucmp));
        let mem = Arc::new(MemTable::new(icmp.clone()));
        for (k, seq, vt, v) in entries {
            mem.add(*seq, *vt, k.as_bytes(), v.as_bytes());
        }
        let merged = MergingIterator::new(Arc::new(icmp.clone()), vec![Box::new(mem.iter())]);
        let table_cache = Arc::new(crate::table_cache::TableCache::new(
            std::path::Path::new("unused"),
            Default::default(),
            100,
            Arc::new(crate::cache::Cache::new(16)),
        ));
        DbIterator::new(ucmp, merged, sequence, Arc::new(Version::new(icmp, table_cache)))
    }

    fn entries() -> Vec<(&'static str, u64, ValueType, &'static str)> {
        vec![
            ("a", 1, ValueType::Value, "a1"),
            ("b", 2, ValueType::Value, "b2"),
            ("b", 5, ValueType::Deletion, ""),
            ("c", 3, ValueType::Value, "c3"),
            ("c", 6, ValueType::Value, "c6"),
            ("d", 4, ValueType::Value, "d4"),
        ]
    }

    fn strings(kvs: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(String, String)> {
        kvs.into_iter()
            .map(|(k, v)| (String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap()))
            .collect()
    }

    #[test]
    fn forward_collapses_versions() {
        let mut it = db_iter(&entries(), 100);
        it.seek_to_first().unwrap();
        let got = strings(collect_entries(&mut it).unwrap());
        assert_eq!(
            got,
            vec![("a".into(), "a1".into()), ("c".into(), "c6".into()), ("d".into(), "d4".into())]
        );
    }

    #[test]
    fn older_sequence_sees_older_state() {
        let mut it = db_iter(&entries(), 4);
        it.seek_to_first().unwrap();
        let got = strings(collect_entries(&mut it).unwrap());
        assert_eq!(
            got,
            vec![
                ("a".into(), "a1".into()),
                ("b".into(), "b2".into()),
                ("c".into(), "c3".into()),
                ("d".into(), "d4".into())
            ]
        );
    }

    #[test]
    fn reverse_and_direction_switch() {
        let mut it = db_iter(&entries(), 100);
        it.seek_to_last().unwrap();
        assert_eq!(it.key(), b"d");
        it.prev().unwrap();
        assert_eq!((it.key(), it.value()), (&b"c"[..], &b"c6"[..]));
        it.prev().unwrap();
        assert_eq!(it.key(), b"a");
        it.next().unwrap();
        assert_eq!(it.key(), b"c");
        it.next().unwrap();
        assert_eq!(it.key(), b"d");
        it.next().unwrap();
        assert!(!it.is_valid());
    }

    #[test]
    fn seek_skips_deleted_key() {
        let mut it = db_iter(&entries(), 100);
        it.seek(b"b").unwrap();
        assert_eq!(it.key(), b"c");
        it.seek(b"e").unwrap();
        assert!(!it.is_valid());
    }
}
