//! Background work: memtable flushes, size/seek-triggered compactions
//! and `compact_range` steps, all run on one thread per database.

use std::cmp::Ordering as KeyOrdering;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::MutexGuard;

use crate::comparator::Comparator;
use crate::db::builder::build_table;
use crate::db::filename::table_file_name;
use crate::db::{DbInner, DbState, ManualCompaction, Signal};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::memtable::MemTable;
use crate::sstable::TableBuilder;
use crate::types::{extract_user_key, InternalKey, ParsedInternalKey, SequenceNumber, ValueType, MAX_SEQUENCE};
use crate::version::{total_file_size, Compaction, FileMetaData, VersionEdit};

/// Body of the background thread. Runs until `Shutdown` arrives.
pub(crate) fn background_loop(inner: Arc<DbInner>, signals: Receiver<Signal>) {
    tracing::debug!("background thread started");
    while let Ok(Signal::Work) = signals.recv() {
        inner.work_pending.store(false, Ordering::Release);
        inner.background_call();
    }
    tracing::debug!("background thread stopped");
}

/// Output file being written by a compaction.
struct OutputFile {
    number: u64,
    builder: TableBuilder,
    smallest: Vec<u8>,
    largest: Vec<u8>,
}

/// How a compaction's merge loop ended.
enum MergeOutcome {
    Finished,
    /// Suspended or shutting down; outputs are discarded.
    Aborted,
}

impl DbInner {
    fn background_call(&self) {
        let mut state = self.state.lock();
        if !self.shutting_down.load(Ordering::Acquire) && state.bg_error.is_none() {
            if let Err(e) = self.background_compaction(&mut state) {
                self.record_background_error(&mut state, e);
            }
        }
        // One step per signal; queue another if more is due.
        self.maybe_schedule_compaction(&state);
        self.bg_cv.notify_all();
    }

    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        if state.imm.is_some() {
            return self.compact_memtable(state);
        }

        let manual = state
            .manual
            .as_ref()
            .map(|m| (m.level, m.begin.clone(), m.end.clone()));
        let is_manual = manual.is_some();
        let mut manual_end = None;
        let picked = match &manual {
            Some((level, begin, end)) => {
                let c = state.versions.compact_range(*level, begin.as_ref(), end.as_ref());
                manual_end = c
                    .as_ref()
                    .and_then(|c| c.inputs[0].last().map(|f| f.largest.clone()));
                if c.is_none() {
                    tracing::info!(level, "manual compaction has nothing to do");
                }
                c
            }
            None if self.suspended.load(Ordering::Acquire) => None,
            None => state.versions.pick_compaction(),
        };

        let result = match picked {
            None => Ok(()),
            Some(c) if !is_manual && c.is_trivial_move() => self.trivial_move(state, c),
            Some(c) => self.do_compaction_work(state, c, is_manual),
        };
        self.delete_obsolete_files(state);

        if is_manual {
            match (&result, manual_end) {
                (Ok(()), Some(end)) => {
                    // Continue from where this step stopped.
                    if let Some(m) = state.manual.as_mut() {
                        m.begin = Some(end);
                    }
                }
                _ => state.manual = None,
            }
        }
        result
    }

    fn trivial_move(&self, state: &mut MutexGuard<'_, DbState>, c: Compaction) -> Result<()> {
        let level = c.level();
        let f = Arc::clone(c.input(0, 0));
        let mut edit = c.into_edit();
        edit.remove_file(level, f.number);
        edit.add_file(level + 1, FileMetaData::clone(&f));
        self.log_and_apply(state, &mut edit)?;
        tracing::info!(
            file = f.number,
            size = f.file_size,
            from = level,
            to = level + 1,
            files = %state.versions.level_summary(),
            "moved table"
        );
        Ok(())
    }

    /// Flush the frozen memtable to a table and drop the logs it covered.
    pub(crate) fn compact_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let Some(imm) = state.imm.clone() else {
            return Ok(());
        };
        let mut edit = VersionEdit::new();
        self.write_level0_table(state, &imm, &mut edit, true)?;

        // Earlier logs are no longer needed once the table is recorded.
        edit.set_prev_log_number(0);
        edit.set_log_number(state.logfile_number);
        self.log_and_apply(state, &mut edit)?;

        state.imm = None;
        self.has_imm.store(false, Ordering::Release);
        self.bg_cv.notify_all();
        self.delete_obsolete_files(state);
        Ok(())
    }

    /// Write `mem` to a new table and record it in `edit`. With
    /// `use_base`, a table that overlaps nothing may be placed below
    /// level 0.
    pub(crate) fn write_level0_table(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        mem: &Arc<MemTable>,
        edit: &mut VersionEdit,
        use_base: bool,
    ) -> Result<()> {
        let start = Instant::now();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        let base = state.versions.current();
        tracing::info!(table = number, entries = mem.len(), "level-0 table started");

        let built = MutexGuard::unlocked(state, || {
            let mut iter = mem.iter();
            build_table(&self.dbname, &self.table_cache, &mut iter, number)
        });
        state.pending_outputs.remove(&number);
        let meta = built?;

        let Some(meta) = meta else {
            tracing::info!(table = number, "memtable empty; no table written");
            return Ok(());
        };
        let level = if use_base {
            base.pick_level_for_memtable_output(
                meta.smallest.user_key(),
                meta.largest.user_key(),
                self.options.max_file_size,
            )
        } else {
            0
        };
        tracing::info!(table = number, bytes = meta.file_size, level, "level-0 table finished");
        state.stats[level].add(start.elapsed().as_micros() as u64, 0, meta.file_size);
        edit.add_file(level, meta);
        Ok(())
    }

    /// Merge the inputs of `c` into new files at the next level.
    fn do_compaction_work(&self, state: &mut MutexGuard<'_, DbState>, mut c: Compaction, is_manual: bool) -> Result<()> {
        let start = Instant::now();
        tracing::info!(
            inputs = %c.summary(),
            level = c.level(),
            manual = is_manual,
            "compacting"
        );
        let smallest_snapshot = self
            .snapshots
            .oldest()
            .unwrap_or_else(|| state.versions.last_sequence());

        let mut outputs: Vec<FileMetaData> = Vec::new();
        let mut numbers: Vec<u64> = Vec::new();
        let merged = MutexGuard::unlocked(state, || {
            self.merge_inputs(&mut c, is_manual, smallest_snapshot, &mut outputs, &mut numbers)
        });
        for number in &numbers {
            state.pending_outputs.remove(number);
        }

        let level = c.level();
        let bytes_read = total_file_size(&c.inputs[0]) + total_file_size(&c.inputs[1]);
        let bytes_written: u64 = outputs.iter().map(|f| f.file_size).sum();
        state.stats[level + 1].add(start.elapsed().as_micros() as u64, bytes_read, bytes_written);

        match merged? {
            MergeOutcome::Aborted => {
                tracing::info!(level, discarded = outputs.len(), "compaction aborted");
                Ok(())
            }
            MergeOutcome::Finished => {
                c.add_input_deletions();
                for f in outputs {
                    c.edit().add_file(level + 1, f);
                }
                let mut edit = c.into_edit();
                self.log_and_apply(state, &mut edit)?;
                tracing::info!(
                    level,
                    bytes_read,
                    bytes_written,
                    files = %state.versions.level_summary(),
                    "compacted"
                );
                Ok(())
            }
        }
    }

    /// The merge loop. Runs without the engine lock; takes it briefly to
    /// allocate file numbers and to flush a memtable that fills up
    /// meanwhile.
    fn merge_inputs(
        &self,
        c: &mut Compaction,
        is_manual: bool,
        smallest_snapshot: SequenceNumber,
        outputs: &mut Vec<FileMetaData>,
        numbers: &mut Vec<u64>,
    ) -> Result<MergeOutcome> {
        let ucmp = Arc::clone(self.icmp.user_comparator());
        let mut input = c.input_iterator(self.options.paranoid_checks)?;
        input.seek_to_first()?;

        let mut output: Option<OutputFile> = None;
        // Grandparent overlap asked for a split the current user key
        // prevented; honored at the next user key.
        let mut stop_pending = false;
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE;

        while input.is_valid() {
            if self.shutting_down.load(Ordering::Acquire) {
                return self.abandon(output, MergeOutcome::Aborted);
            }
            if self.has_imm.load(Ordering::Acquire) {
                let mut state = self.state.lock();
                if state.imm.is_some() {
                    self.compact_memtable(&mut state)?;
                }
            }

            let key = input.key().to_vec();
            stop_pending |= c.should_stop_before(&key);
            if let Some(out) = &output {
                let new_user_key = ucmp.compare(extract_user_key(&key), extract_user_key(&out.largest)) != KeyOrdering::Equal;
                if new_user_key && (stop_pending || out.builder.file_size() >= c.max_output_file_size()) {
                    if let Some(out) = output.take() {
                        outputs.push(self.finish_output(out)?);
                    }
                    stop_pending = false;
                }
            }

            let discard = match ParsedInternalKey::parse(&key) {
                Err(_) => {
                    // Keep corrupt keys visible rather than hiding them.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE;
                    false
                }
                Ok(ikey) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .is_none_or(|k| ucmp.compare(ikey.user_key, k) != KeyOrdering::Equal);
                    if first_occurrence {
                        current_user_key = Some(ikey.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE;
                    }
                    let discard = if last_sequence_for_key <= smallest_snapshot {
                        // A newer entry for this key is visible to every
                        // snapshot.
                        true
                    } else {
                        ikey.value_type == ValueType::Deletion
                            && ikey.sequence <= smallest_snapshot
                            && c.is_base_level_for_key(ikey.user_key)
                    };
                    last_sequence_for_key = ikey.sequence;
                    discard
                }
            };

            if !discard {
                if output.is_none() {
                    if !is_manual && self.suspended.load(Ordering::Acquire) {
                        return self.abandon(None, MergeOutcome::Aborted);
                    }
                    let number = self.open_output_number();
                    numbers.push(number);
                    let path = table_file_name(&self.dbname, number);
                    output = Some(OutputFile {
                        number,
                        builder: TableBuilder::create(&path, self.table_cache.options().clone())?,
                        smallest: key.clone(),
                        largest: Vec::new(),
                    });
                }
                if let Some(out) = output.as_mut() {
                    out.builder.add(&key, input.value())?;
                    out.largest = key;
                }
            }
            input.next()?;
        }

        if let Some(out) = output.take() {
            outputs.push(self.finish_output(out)?);
        }
        Ok(MergeOutcome::Finished)
    }

    fn open_output_number(&self) -> u64 {
        let mut state = self.state.lock();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        number
    }

    fn abandon(&self, output: Option<OutputFile>, outcome: MergeOutcome) -> Result<MergeOutcome> {
        if let Some(mut out) = output {
            out.builder.abandon();
        }
        Ok(outcome)
    }

    /// Finish an output table and check that it opens.
    fn finish_output(&self, mut out: OutputFile) -> Result<FileMetaData> {
        let entries = out.builder.num_entries();
        let file_size = out.builder.finish()?;
        let mut check = self.table_cache.iter(out.number, file_size, false, false)?;
        check.seek_to_first()?;
        tracing::debug!(table = out.number, entries, bytes = file_size, "compaction output finished");
        Ok(FileMetaData::new(
            out.number,
            file_size,
            InternalKey::decode_from(&out.smallest),
            InternalKey::decode_from(&out.largest),
        ))
    }

    /// Run one `compact_range` level on the background thread and wait for
    /// it to cover the whole range.
    pub(crate) fn manual_compaction(&self, level: usize, begin: Option<InternalKey>, end: Option<InternalKey>) -> Result<()> {
        let mut state = self.state.lock();
        while state.manual.is_some() && !self.shutting_down.load(Ordering::Acquire) {
            self.bg_cv.wait(&mut state);
        }
        let id = state.next_manual_id;
        state.next_manual_id += 1;
        state.manual = Some(ManualCompaction { id, level, begin, end });

        loop {
            if let Some(e) = &state.bg_error {
                let err = Error::Background(Box::new(e.clone()));
                if state.manual.as_ref().is_some_and(|m| m.id == id) {
                    state.manual = None;
                }
                return Err(err);
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            if !state.manual.as_ref().is_some_and(|m| m.id == id) {
                return Ok(());
            }
            self.maybe_schedule_compaction(&state);
            self.bg_cv.wait(&mut state);
        }
    }
}
