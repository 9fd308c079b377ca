//! The database engine: ties the log, memtables, versions and the
//! background compactor together behind [`Db`].
//!
//! ```text
//! put/delete ──> WAL ──> memtable ──(full)──> immutable memtable
//!                                                  │ flush
//!                                                  ▼
//! get ──> memtable ──> immutable ──> L0 ──> L1 ──> ... ──> L6
//!                                      ▲ background compaction
//! ```

pub mod builder;
pub mod compaction;
pub mod filename;
pub mod iter;
pub mod recovery;
pub mod repair;
pub mod snapshot;
pub mod write;

use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::batch::WriteBatch;
use crate::cache::Cache;
use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::iterator::{MergingIterator, StorageIterator};
use crate::memtable::{LookupResult, MemTable};
use crate::options::{Options, ReadOptions, WriteOptions};
use crate::sstable::TableOptions;
use crate::table_cache::TableCache;
use crate::types::{InternalKey, LookupKey, SequenceNumber, ValueType, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK};
use crate::version::{VersionEdit, VersionSet, NUM_LEVELS};
use crate::wal::LogWriter;
use filename::{parse_file_name, FileType};
use snapshot::SnapshotList;

pub use iter::DbIterator;
pub use repair::repair_db;
pub use snapshot::Snapshot;

const PROPERTY_PREFIX: &str = "stratadb.";

/// Per-level compaction counters reported by the `stats` property.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    pub(crate) fn add(&mut self, micros: u64, bytes_read: u64, bytes_written: u64) {
        self.micros += micros;
        self.bytes_read += bytes_read;
        self.bytes_written += bytes_written;
    }
}

/// A requested `compact_range` step, carried out by the background thread.
pub(crate) struct ManualCompaction {
    pub id: u64,
    pub level: usize,
    pub begin: Option<InternalKey>,
    pub end: Option<InternalKey>,
}

/// Everything guarded by the engine lock. Held for pointer swaps and
/// bookkeeping only; table and log I/O run with it released.
pub(crate) struct DbState {
    pub mem: Arc<MemTable>,
    /// Frozen memtable waiting to be flushed.
    pub imm: Option<Arc<MemTable>>,
    pub versions: VersionSet,
    /// Number of the log backing `mem`.
    pub logfile_number: u64,
    /// Table files being written; protected from obsolete-file deletion.
    pub pending_outputs: HashSet<u64>,
    /// Sticky: once set, every write fails with it.
    pub bg_error: Option<Error>,
    pub manual: Option<ManualCompaction>,
    pub next_manual_id: u64,
    pub stats: [CompactionStats; NUM_LEVELS],
}

pub(crate) struct WalState {
    pub writer: LogWriter,
    pub number: u64,
}

/// Signals to the background thread.
pub(crate) enum Signal {
    Work,
    Shutdown,
}

pub(crate) struct DbInner {
    pub dbname: PathBuf,
    pub options: Options,
    pub icmp: InternalKeyComparator,
    pub table_cache: Arc<TableCache>,

    pub state: Mutex<DbState>,
    /// Notified whenever background work finishes a step.
    pub bg_cv: Condvar,
    /// Serializes writers.
    pub writer_lock: Mutex<()>,
    /// Only touched with `writer_lock` held (or during open).
    pub wal: Mutex<Option<WalState>>,
    pub snapshots: Arc<SnapshotList>,

    pub suspended: AtomicBool,
    pub shutting_down: AtomicBool,
    /// Mirrors `state.imm.is_some()` so a running compaction can check for
    /// a pending flush without taking the lock.
    pub has_imm: AtomicBool,
    /// Set while a `Work` signal is queued; extra requests coalesce into it.
    pub work_pending: AtomicBool,
    pub work_tx: Sender<Signal>,
}

impl DbInner {
    fn check_open(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Apply `edit`, writing the manifest with the lock released.
    pub(crate) fn log_and_apply(&self, state: &mut MutexGuard<'_, DbState>, edit: &mut VersionEdit) -> Result<()> {
        let mut pending = state.versions.prepare_apply(edit)?;
        let written = MutexGuard::unlocked(state, || pending.manifest.write());
        state.versions.finish_apply(pending, written)
    }

    /// Queue background work if any is due.
    pub(crate) fn maybe_schedule_compaction(&self, state: &DbState) {
        if self.shutting_down.load(Ordering::Acquire) || state.bg_error.is_some() {
            return;
        }
        let due = state.imm.is_some()
            || state.manual.is_some()
            || (!self.suspended.load(Ordering::Acquire) && state.versions.needs_compaction());
        if due && !self.work_pending.swap(true, Ordering::AcqRel) {
            let _ = self.work_tx.send(Signal::Work);
        }
    }

    pub(crate) fn record_background_error(&self, state: &mut DbState, err: Error) {
        if state.bg_error.is_none() {
            tracing::error!(error = %err, "background error; writes are now refused");
            state.bg_error = Some(err);
            self.bg_cv.notify_all();
        }
    }

    /// Delete every file no live version, pending output or current log
    /// refers to.
    pub(crate) fn delete_obsolete_files(&self, state: &mut MutexGuard<'_, DbState>) {
        if state.bg_error.is_some() {
            // Unclear whether the last edit committed; keep everything.
            return;
        }
        let mut live = state.pending_outputs.clone();
        live.extend(state.versions.live_files());
        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();

        let entries = match std::fs::read_dir(&self.dbname) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list database directory");
                return;
            }
        };
        let mut doomed = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((number, file_type)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                FileType::Descriptor => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::InfoLog => true,
            };
            if !keep {
                if file_type == FileType::Table {
                    self.table_cache.evict(number);
                }
                doomed.push((entry.path(), number, file_type));
            }
        }

        MutexGuard::unlocked(state, || {
            for (path, number, file_type) in doomed {
                match std::fs::remove_file(&path) {
                    Ok(()) => tracing::debug!(file = number, ?file_type, "deleted obsolete file"),
                    Err(e) => tracing::warn!(file = number, ?file_type, error = %e, "failed to delete obsolete file"),
                }
            }
        });
    }
}

/// An open database.
///
/// Safe to share between threads; every method takes `&self`. Dropping the
/// handle closes the database.
pub struct Db {
    inner: Arc<DbInner>,
    bg_thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dbname", &self.inner.dbname)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Open the database at `path`, recovering whatever a previous process
    /// left behind.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Db> {
        let options = options.sanitize()?;
        let dbname = path.as_ref().to_path_buf();
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));

        let block_cache = Arc::new(Cache::new((options.block_cache_size / options.block_size).max(1)));
        let table_cache = Arc::new(TableCache::new(
            &dbname,
            TableOptions::for_db(&options, &icmp),
            options.max_open_files,
            block_cache,
        ));
        let versions = VersionSet::new(&dbname, &options, Arc::clone(&table_cache));
        let (work_tx, work_rx) = crossbeam_channel::unbounded();

        let inner = Arc::new(DbInner {
            state: Mutex::new(DbState {
                mem: Arc::new(MemTable::new(icmp.clone())),
                imm: None,
                versions,
                logfile_number: 0,
                pending_outputs: HashSet::new(),
                bg_error: None,
                manual: None,
                next_manual_id: 0,
                stats: [CompactionStats::default(); NUM_LEVELS],
            }),
            dbname,
            options,
            icmp,
            table_cache,
            bg_cv: Condvar::new(),
            writer_lock: Mutex::new(()),
            wal: Mutex::new(None),
            snapshots: Arc::new(SnapshotList::default()),
            suspended: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            work_pending: AtomicBool::new(false),
            work_tx,
        });

        {
            let mut state = inner.state.lock();
            let mut edit = inner.recover(&mut state)?;

            let number = state.versions.new_file_number();
            let writer = LogWriter::create(&filename::log_file_name(&inner.dbname, number))?;
            *inner.wal.lock() = Some(WalState { writer, number });
            state.logfile_number = number;

            edit.set_prev_log_number(0);
            edit.set_log_number(number);
            inner.log_and_apply(&mut state, &mut edit)?;
            inner.delete_obsolete_files(&mut state);
            inner.maybe_schedule_compaction(&state);
            tracing::info!(
                path = %inner.dbname.display(),
                log = number,
                last_sequence = state.versions.last_sequence(),
                files = %state.versions.level_summary(),
                "database opened"
            );
        }

        let bg_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("stratadb-bg".to_owned())
            .spawn(move || compaction::background_loop(bg_inner, work_rx))?;

        Ok(Db {
            inner,
            bg_thread: Mutex::new(Some(handle)),
        })
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    /// Remove `key`. Deleting a missing key is not an error.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Apply every operation of `batch` atomically.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.inner.check_open()?;
        self.inner.write(options, Some(batch))
    }

    /// Newest value of `key` visible to `options.snapshot` (or to the
    /// latest state). `Ok(None)` when the key is absent or deleted.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.check_open()?;
        let (mem, imm, version, sequence) = {
            let state = self.inner.state.lock();
            let sequence = match &options.snapshot {
                Some(s) => s.sequence(),
                None => state.versions.last_sequence(),
            };
            (Arc::clone(&state.mem), state.imm.clone(), state.versions.current(), sequence)
        };

        let lookup = LookupKey::new(key, sequence);
        let mut hit = mem.get(&lookup);
        if hit.is_none() {
            hit = imm.and_then(|imm| imm.get(&lookup));
        }
        if hit.is_none() {
            let (found, stats) = version.get(&lookup, options.verify_checksums, options.fill_cache)?;
            if version.update_stats(&stats) {
                let state = self.inner.state.lock();
                self.inner.maybe_schedule_compaction(&state);
            }
            hit = found;
        }
        Ok(match hit {
            Some(LookupResult::Found(value)) => Some(value),
            Some(LookupResult::Deleted) | None => None,
        })
    }

    /// Iterator over the user keys visible to `options.snapshot` (or to the
    /// state at the time of the call). Not positioned until seeked.
    pub fn iter(&self, options: &ReadOptions) -> Result<DbIterator> {
        self.inner.check_open()?;
        let (mem, imm, version, sequence) = {
            let state = self.inner.state.lock();
            let sequence = match &options.snapshot {
                Some(s) => s.sequence(),
                None => state.versions.last_sequence(),
            };
            (Arc::clone(&state.mem), state.imm.clone(), state.versions.current(), sequence)
        };

        let mut children: Vec<Box<dyn StorageIterator>> = vec![Box::new(mem.iter())];
        if let Some(imm) = imm {
            children.push(Box::new(imm.iter()));
        }
        version.add_iterators(options.verify_checksums, options.fill_cache, &mut children)?;
        let merged = MergingIterator::new(Arc::new(self.inner.icmp.clone()), children);
        Ok(DbIterator::new(
            Arc::clone(self.inner.icmp.user_comparator()),
            merged,
            sequence,
            version,
        ))
    }

    /// Pin the current state for reads through [`ReadOptions::snapshot`].
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        self.inner.snapshots.acquire(state.versions.last_sequence())
    }

    /// Release a snapshot. Equivalent to dropping it; data it pinned becomes
    /// collectable once every clone is gone.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Approximate bytes of table data in each `[start, limit)` user-key
    /// range. Data still in memtables is not counted.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        let version = self.inner.state.lock().versions.current();
        ranges
            .iter()
            .map(|(start, limit)| {
                let k1 = InternalKey::new(start, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
                let k2 = InternalKey::new(limit, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
                let start = version.approximate_offset_of(&k1);
                let limit = version.approximate_offset_of(&k2);
                limit.saturating_sub(start)
            })
            .collect()
    }

    /// Engine introspection. Recognized names, all prefixed `stratadb.`:
    ///
    /// * `num-files-at-level<N>`: table count at level N
    /// * `stats`: per-level sizes and compaction counters
    /// * `sstables`: every table file by level
    /// * `approximate-memory-usage`: bytes held by memtables
    /// * `background-error`: the sticky background error, empty if none
    pub fn property(&self, name: &str) -> Option<String> {
        let name = name.strip_prefix(PROPERTY_PREFIX)?;
        let state = self.inner.state.lock();

        if let Some(level) = name.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            return (level < NUM_LEVELS).then(|| state.versions.num_level_files(level).to_string());
        }
        match name {
            "stats" => {
                let mut out = String::new();
                let _ = writeln!(out, "                               Compactions");
                let _ = writeln!(out, "Level  Files Size(MB) Time(sec) Read(MB) Write(MB)");
                let _ = writeln!(out, "--------------------------------------------------");
                for (level, stats) in state.stats.iter().enumerate() {
                    let files = state.versions.num_level_files(level);
                    if files == 0 && stats.micros == 0 {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "{level:>3} {files:>8} {:>8.0} {:>9.0} {:>8.0} {:>9.0}",
                        state.versions.num_level_bytes(level) as f64 / 1048576.0,
                        stats.micros as f64 / 1e6,
                        stats.bytes_read as f64 / 1048576.0,
                        stats.bytes_written as f64 / 1048576.0,
                    );
                }
                Some(out)
            }
            "sstables" => Some(state.versions.current().debug_string()),
            "approximate-memory-usage" => {
                let mut total = state.mem.approximate_memory_usage();
                if let Some(imm) = &state.imm {
                    total += imm.approximate_memory_usage();
                }
                Some(total.to_string())
            }
            "background-error" => Some(state.bg_error.as_ref().map(|e| e.to_string()).unwrap_or_default()),
            _ => None,
        }
    }

    /// Stop starting automatic compactions. A running one stops at its
    /// next output file boundary and its partial output is discarded.
    /// Memtable flushes and explicit `compact_range` calls still run.
    pub fn suspend_compactions(&self) {
        self.inner.suspended.store(true, Ordering::Release);
        tracing::info!("compactions suspended");
    }

    pub fn resume_compactions(&self) {
        self.inner.suspended.store(false, Ordering::Release);
        tracing::info!("compactions resumed");
        let state = self.inner.state.lock();
        self.inner.maybe_schedule_compaction(&state);
    }

    /// Compact every level overlapping the user-key range `[begin, end]`
    /// (`None` is unbounded) after flushing the memtable. Deleted and
    /// overwritten data in the range is discarded.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.inner.check_open()?;
        let max_level_with_files = {
            let state = self.inner.state.lock();
            let version = state.versions.current();
            (1..NUM_LEVELS)
                .filter(|&level| version.overlap_in_level(level, begin, end))
                .max()
                .unwrap_or(1)
        };
        self.flush()?;
        let begin = begin.map(|k| InternalKey::new(k, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK));
        let end = end.map(|k| InternalKey::new(k, 0, ValueType::Deletion));
        for level in 0..max_level_with_files {
            self.inner.manual_compaction(level, begin.clone(), end.clone())?;
        }
        Ok(())
    }

    /// Write the memtable out as a table and wait for it to be installed.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        let has_data = !self.inner.state.lock().mem.is_empty();
        if has_data {
            self.inner.write(&WriteOptions::default(), None)?;
        }
        let mut state = self.inner.state.lock();
        while state.imm.is_some() && state.bg_error.is_none() && !self.inner.shutting_down.load(Ordering::Acquire) {
            self.inner.bg_cv.wait(&mut state);
        }
        match &state.bg_error {
            Some(e) => Err(Error::Background(Box::new(e.clone()))),
            None => self.inner.check_open(),
        }
    }

    /// Stop the background thread and sync the log. Later calls on this
    /// handle fail with [`Error::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let _state = self.inner.state.lock();
            self.inner.bg_cv.notify_all();
        }
        let _ = self.inner.work_tx.send(Signal::Shutdown);
        if let Some(handle) = self.bg_thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("background thread panicked");
            }
        }

        let _writer = self.inner.writer_lock.lock();
        if let Some(wal) = self.inner.wal.lock().as_mut() {
            wal.writer.sync()?;
        }
        tracing::info!(path = %self.inner.dbname.display(), "database closed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.inner.dbname
    }

    /// Last sequence number assigned to a write.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.inner.state.lock().versions.last_sequence()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error while closing database");
        }
    }
}

/// Delete a database's files and then its directory (if it ends up
/// empty). Files the engine did not create are left alone.
pub fn destroy_db(path: impl AsRef<Path>, _options: &Options) -> Result<()> {
    let dbname = path.as_ref();
    let entries = match std::fs::read_dir(dbname) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut result = Ok(());
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_str().and_then(parse_file_name).is_none() {
            continue;
        }
        if let Err(e) = std::fs::remove_file(entry.path()) {
            tracing::warn!(file = ?name, error = %e, "failed to remove database file");
            if result.is_ok() {
                result = Err(e.into());
            }
        }
    }
    // Fails harmlessly when foreign files remain.
    let _ = std::fs::remove_dir(dbname);
    tracing::info!(path = %dbname.display(), "database destroyed");
    result
}
