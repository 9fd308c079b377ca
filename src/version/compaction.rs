use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::{MergingIterator, StorageIterator};
use crate::version::{
    concatenating_iter, max_grandparent_overlap_bytes, total_file_size, FileMetaData, Version, VersionEdit,
    NUM_LEVELS,
};

/// A picked compaction: files from `level` and `level + 1` to merge into
/// new files at `level + 1`.
pub struct Compaction {
    level: usize,
    max_output_file_size: u64,
    input_version: Arc<Version>,
    edit: VersionEdit,
    icmp: InternalKeyComparator,

    /// `inputs[0]` from `level`, `inputs[1]` from `level + 1`.
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Files in `level + 2` overlapping the compaction range.
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    /// Per-level cursors for `is_base_level_for_key`; keys arrive in order
    /// so the cursors only move forward.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(level: usize, max_output_file_size: u64, input_version: Arc<Version>, icmp: InternalKeyComparator) -> Self {
        Compaction {
            level,
            max_output_file_size,
            input_version,
            edit: VersionEdit::new(),
            icmp,
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn edit(&mut self) -> &mut VersionEdit {
        &mut self.edit
    }

    pub fn into_edit(self) -> VersionEdit {
        self.edit
    }

    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input(&self, which: usize, i: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][i]
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// A single input file with nothing to merge against can be moved to
    /// the next level without rewriting it, unless it would overlap too
    /// much of the grandparent level.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= max_grandparent_overlap_bytes(self.max_output_file_size)
    }

    /// Record the deletion of every input file in the edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for f in &self.inputs[which] {
                self.edit.remove_file(self.level + which, f.number);
            }
        }
    }

    /// True when no level below the output level can hold `user_key`, so a
    /// tombstone for it may be dropped.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        for level in self.level + 2..NUM_LEVELS {
            let files = &self.input_version.files[level];
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// True when the output file should end before `internal_key` because
    /// it already overlaps too much of the grandparent level.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && self.icmp.compare(
                internal_key,
                self.grandparents[self.grandparent_index].largest.encode(),
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > max_grandparent_overlap_bytes(self.max_output_file_size) {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }

    /// Merged view of every input entry. Level-0 files get an iterator
    /// each; a sorted level is read through one concatenating iterator.
    pub fn input_iterator(&self, verify: bool) -> Result<MergingIterator> {
        let table_cache = &self.input_version.table_cache;
        let mut list: Vec<Box<dyn StorageIterator>> = Vec::new();
        for which in 0..2 {
            if self.inputs[which].is_empty() {
                continue;
            }
            if self.level + which == 0 {
                for f in &self.inputs[which] {
                    list.push(table_cache.iter(f.number, f.file_size, verify, false)?);
                }
            } else {
                list.push(Box::new(concatenating_iter(
                    &self.icmp,
                    self.inputs[which].clone(),
                    Arc::clone(table_cache),
                    verify,
                    false,
                )));
            }
        }
        Ok(MergingIterator::new(Arc::new(self.icmp.clone()), list))
    }

    /// Input sizes for logging: "N@level + M@level+1 files".
    pub fn summary(&self) -> String {
        format!(
            "{}@{} + {}@{} files",
            self.inputs[0].len(),
            self.level,
            self.inputs[1].len(),
            self.level + 1
        )
    }
}
