//! Versions: immutable snapshots of which table files make up each level.
//!
//! ```text
//! Level 0: [sst] [sst] [sst]          ← freshly flushed, may overlap
//! Level 1: [sst-a..f] [sst-g..m] ...   ← non-overlapping, 10 MiB budget
//! Level 2: [sst] [sst] ... [sst]       ← non-overlapping, 100 MiB budget
//! ...
//! ```
//!
//! A version is shared behind an `Arc`; readers and compactions that hold
//! one keep its files from being deleted.

pub mod compaction;
pub mod edit;
pub mod set;

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::Ordering as AtomicOrdering;

use parking_lot::Mutex;

use crate::coding::{decode_fixed64, put_fixed64};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::iterator::{BlockSource, StorageIterator, TwoLevelIterator};
use crate::memtable::LookupResult;
use crate::table_cache::TableCache;
use crate::types::{InternalKey, LookupKey, ParsedInternalKey, ValueType, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK};

pub use compaction::Compaction;
pub use edit::{FileMetaData, VersionEdit};
pub use set::VersionSet;

pub const NUM_LEVELS: usize = 7;

/// Level-0 compaction starts when this many files accumulate.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Soft limit on level-0 files; writes are delayed past it.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Hard limit on level-0 files; writes stop past it.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Highest level a flushed memtable may be pushed to when it overlaps
/// nothing.
pub const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Bytes of table data that cost one seek, for seek-triggered compaction.
const BYTES_PER_SEEK: u64 = 16 * 1024;

/// Byte budget of `level` (level 0 is governed by file count instead).
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1048576.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Index of the first file whose largest key is >= `key`, or `files.len()`.
pub fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encode(), key) == Ordering::Less)
}

fn after_file(icmp: &InternalKeyComparator, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
    user_key.is_some_and(|k| icmp.compare_user(k, f.largest.user_key()) == Ordering::Greater)
}

fn before_file(icmp: &InternalKeyComparator, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
    user_key.is_some_and(|k| icmp.compare_user(k, f.smallest.user_key()) == Ordering::Less)
}

/// Whether any file overlaps the user-key range `[smallest, largest]`;
/// `None` bounds are open. `disjoint` files must be sorted and
/// non-overlapping.
pub fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    if !disjoint {
        return files.iter().any(|f| {
            !after_file(icmp, smallest_user_key, f) && !before_file(icmp, largest_user_key, f)
        });
    }
    let index = match smallest_user_key {
        Some(k) => {
            let small = InternalKey::new(k, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, small.encode())
        }
        None => 0,
    };
    index < files.len() && !before_file(icmp, largest_user_key, &files[index])
}

/// The file a lookup had to read past without finding its key. Charged
/// against that file's seek allowance.
#[derive(Default)]
pub struct GetStats {
    pub seek_file: Option<(Arc<FileMetaData>, usize)>,
}

pub struct Version {
    pub(crate) files: Vec<Vec<Arc<FileMetaData>>>,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    /// File picked by seek accounting, and its level.
    file_to_compact: Mutex<Option<(Arc<FileMetaData>, usize)>>,
    /// Best level to compact next; a score >= 1 means compaction is due.
    pub(crate) compaction_score: f64,
    pub(crate) compaction_level: Option<usize>,
}

impl Version {
    pub(crate) fn new(icmp: InternalKeyComparator, table_cache: Arc<TableCache>) -> Self {
        Version {
            files: vec![Vec::new(); NUM_LEVELS],
            icmp,
            table_cache,
            file_to_compact: Mutex::new(None),
            compaction_score: -1.0,
            compaction_level: None,
        }
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub(crate) fn file_to_compact(&self) -> Option<(Arc<FileMetaData>, usize)> {
        self.file_to_compact.lock().clone()
    }

    /// Look up `key` level by level, newest data first. `None` means no
    /// level holds an entry for the user key.
    pub fn get(&self, key: &LookupKey, verify: bool, fill_cache: bool) -> Result<(Option<LookupResult>, GetStats)> {
        let ikey = key.internal_key();
        let user_key = key.user_key();
        let ucmp = self.icmp.user_comparator();

        let mut stats = GetStats::default();
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;

        for level in 0..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            let candidates: Vec<Arc<FileMetaData>> = if level == 0 {
                // Level-0 files may overlap each other: check all that
                // cover the key, newest first.
                let mut tmp: Vec<_> = files
                    .iter()
                    .filter(|f| {
                        ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                            && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
                    })
                    .cloned()
                    .collect();
                tmp.sort_by(|a, b| b.number.cmp(&a.number));
                tmp
            } else {
                let index = find_file(&self.icmp, files, ikey);
                match files.get(index) {
                    Some(f) if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less => {
                        vec![Arc::clone(f)]
                    }
                    _ => Vec::new(),
                }
            };

            for file in candidates {
                if stats.seek_file.is_none() {
                    if let Some(previous) = last_file_read.take() {
                        // More than one file read: charge the first.
                        stats.seek_file = Some(previous);
                    }
                }
                last_file_read = Some((Arc::clone(&file), level));

                let found = self
                    .table_cache
                    .get(file.number, file.file_size, ikey, verify, fill_cache)?;
                let Some((found_key, value)) = found else {
                    continue;
                };
                let parsed = ParsedInternalKey::parse(&found_key)
                    .map_err(|_| Error::corruption("corrupted internal key in table"))?;
                if ucmp.compare(parsed.user_key, user_key) != Ordering::Equal {
                    continue;
                }
                let result = match parsed.value_type {
                    ValueType::Value => LookupResult::Found(value),
                    ValueType::Deletion => LookupResult::Deleted,
                };
                return Ok((Some(result), stats));
            }
        }
        Ok((None, stats))
    }

    /// Charge a seek to the file in `stats`. Returns true when that file
    /// just became due for compaction.
    pub fn update_stats(&self, stats: &GetStats) -> bool {
        let Some((file, level)) = &stats.seek_file else {
            return false;
        };
        let left = file.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
        let mut pending = self.file_to_compact.lock();
        if left <= 0 && pending.is_none() {
            *pending = Some((Arc::clone(file), *level));
            return true;
        }
        false
    }

    /// Iterators that together yield every entry of this version: one per
    /// level-0 file, one concatenating iterator per deeper level.
    pub fn add_iterators(&self, verify: bool, fill_cache: bool, out: &mut Vec<Box<dyn StorageIterator>>) -> Result<()> {
        for f in &self.files[0] {
            out.push(self.table_cache.iter(f.number, f.file_size, verify, fill_cache)?);
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                out.push(Box::new(self.concatenating_iter(level, verify, fill_cache)));
            }
        }
        Ok(())
    }

    pub(crate) fn concatenating_iter(
        &self,
        level: usize,
        verify: bool,
        fill_cache: bool,
    ) -> TwoLevelIterator<LevelFileNumIterator, FileTables> {
        concatenating_iter(
            &self.icmp,
            self.files[level].clone(),
            Arc::clone(&self.table_cache),
            verify,
            fill_cache,
        )
    }

    pub fn overlap_in_level(&self, level: usize, smallest_user_key: Option<&[u8]>, largest_user_key: Option<&[u8]>) -> bool {
        some_file_overlaps_range(&self.icmp, level > 0, &self.files[level], smallest_user_key, largest_user_key)
    }

    /// Level a flushed memtable covering `[smallest, largest]` should land
    /// on: pushed below level 0 while it overlaps nothing and would not
    /// overlap too much of the grandparent level.
    pub fn pick_level_for_memtable_output(&self, smallest_user_key: &[u8], largest_user_key: &[u8], max_file_size: u64) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            return level;
        }
        let start = InternalKey::new(smallest_user_key, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
        let limit = InternalKey::new(largest_user_key, 0, ValueType::Deletion);
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, Some(smallest_user_key), Some(largest_user_key)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > max_grandparent_overlap_bytes(max_file_size) {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Files in `level` overlapping the user-key range of `[begin, end]`.
    /// On level 0 the range grows to cover every file it touches, since
    /// those files overlap each other.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());
        let mut inputs = Vec::new();

        let files = &self.files[level];
        let mut i = 0;
        while i < files.len() {
            let f = &files[i];
            i += 1;
            let file_start = f.smallest.user_key();
            let file_limit = f.largest.user_key();
            if user_begin.as_deref().is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less) {
                continue;
            }
            if user_end.as_deref().is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater) {
                continue;
            }
            inputs.push(Arc::clone(f));
            if level == 0 {
                if user_begin.as_deref().is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less) {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if user_end.as_deref().is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater) {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Approximate byte offset of `key` within the whole version.
    pub fn approximate_offset_of(&self, key: &InternalKey) -> u64 {
        let mut result = 0;
        for (level, files) in self.files.iter().enumerate() {
            for f in files {
                if self.icmp.compare(f.largest.encode(), key.encode()) != Ordering::Greater {
                    result += f.file_size;
                } else if self.icmp.compare(f.smallest.encode(), key.encode()) == Ordering::Greater {
                    // Deeper levels are sorted: nothing further can contain key.
                    if level > 0 {
                        break;
                    }
                } else {
                    result += self
                        .table_cache
                        .approximate_offset_of(f.number, f.file_size, key.encode())
                        .unwrap_or(0);
                }
            }
        }
        result
    }

    /// Per-level file listing for the `sstables` property.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            let _ = writeln!(out, "--- level {level} ---");
            for f in files {
                let _ = writeln!(out, " {f:?}");
            }
        }
        out
    }
}

pub(crate) fn max_grandparent_overlap_bytes(max_file_size: u64) -> u64 {
    10 * max_file_size
}

pub(crate) fn expanded_compaction_byte_size_limit(max_file_size: u64) -> u64 {
    25 * max_file_size
}

pub(crate) fn initial_allowed_seeks(file_size: u64) -> i64 {
    ((file_size / BYTES_PER_SEEK) as i64).max(100)
}

pub(crate) fn concatenating_iter(
    icmp: &InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<TableCache>,
    verify: bool,
    fill_cache: bool,
) -> TwoLevelIterator<LevelFileNumIterator, FileTables> {
    TwoLevelIterator::new(
        LevelFileNumIterator::new(icmp.clone(), files),
        FileTables {
            table_cache,
            verify,
            fill_cache,
        },
    )
}

/// Index over the files of one sorted level: key is a file's largest key,
/// value is its encoded (number, size).
pub struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    index: usize,
    value: Vec<u8>,
}

impl LevelFileNumIterator {
    pub fn new(icmp: InternalKeyComparator, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        LevelFileNumIterator {
            icmp,
            files,
            index,
            value: Vec::with_capacity(16),
        }
    }

    fn fill_value(&mut self) {
        self.value.clear();
        if let Some(f) = self.files.get(self.index) {
            put_fixed64(&mut self.value, f.number);
            put_fixed64(&mut self.value, f.file_size);
        }
    }
}

impl StorageIterator for LevelFileNumIterator {
    fn is_valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index = 0;
        self.fill_value();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index = if self.files.is_empty() { 0 } else { self.files.len() - 1 };
        self.fill_value();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index = find_file(&self.icmp, &self.files, target);
        self.fill_value();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.index += 1;
            self.fill_value();
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if self.is_valid() {
            self.index = if self.index == 0 { self.files.len() } else { self.index - 1 };
            self.fill_value();
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        match self.files.get(self.index) {
            Some(f) => f.largest.encode(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Opens the table named by a [`LevelFileNumIterator`] value.
pub struct FileTables {
    table_cache: Arc<TableCache>,
    verify: bool,
    fill_cache: bool,
}

impl BlockSource for FileTables {
    fn open(&self, index_value: &[u8]) -> Result<Box<dyn StorageIterator>> {
        if index_value.len() != 16 {
            return Err(Error::corruption("file reader invoked with unexpected value"));
        }
        let number = decode_fixed64(&index_value[..8]);
        let size = decode_fixed64(&index_value[8..]);
        self.table_cache.iter(number, size, self.verify, self.fill_cache)
    }
}
