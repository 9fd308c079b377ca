use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::db::filename::{current_file_name, descriptor_file_name, set_current_file};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::reporter::{CorruptionReporter, RecordingReporter};
use crate::table_cache::TableCache;
use crate::types::{InternalKey, SequenceNumber};
use crate::version::{
    expanded_compaction_byte_size_limit, initial_allowed_seeks, max_bytes_for_level, total_file_size,
    Compaction, FileMetaData, Version, VersionEdit, L0_COMPACTION_TRIGGER, NUM_LEVELS,
};
use crate::wal::{LogReader, LogWriter};

/// Owns the current version, the manifest, and the file number and
/// sequence counters.
///
/// Every change to the set of live files goes through an edit that is
/// appended to the manifest before the new version is installed.
pub struct VersionSet {
    dbname: PathBuf,
    options: Options,
    table_cache: Arc<TableCache>,
    icmp: InternalKeyComparator,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    /// Log being compacted when the process last stopped; 0 if none.
    prev_log_number: u64,

    descriptor_log: Option<LogWriter>,
    current: Arc<Version>,
    /// Every version handed out; dead ones are pruned lazily.
    live: Vec<Weak<Version>>,

    /// Per level: the key at which the next size compaction starts.
    compact_pointer: Vec<Vec<u8>>,
}

/// An edit ready to be written to the manifest. Produced under the state
/// lock by [`VersionSet::prepare_apply`]; [`write`](ManifestWrite::write)
/// does the I/O and may run without the lock.
pub struct ManifestWrite {
    dbname: PathBuf,
    writer: Option<LogWriter>,
    /// Manifest to create first, seeded with a snapshot of the state.
    create: Option<(u64, Vec<u8>)>,
    record: Vec<u8>,
}

impl ManifestWrite {
    pub fn write(&mut self) -> Result<()> {
        if let Some((number, snapshot)) = &self.create {
            let mut writer = LogWriter::create(&descriptor_file_name(&self.dbname, *number))?;
            writer.add_record(snapshot)?;
            self.writer = Some(writer);
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("no open manifest to write to"))?;
        writer.add_record(&self.record)?;
        writer.sync()?;
        if let Some((number, _)) = &self.create {
            set_current_file(&self.dbname, *number)?;
        }
        Ok(())
    }
}

/// The result of applying an edit, waiting for its manifest write.
pub struct PendingApply {
    pub manifest: ManifestWrite,
    version: Version,
    log_number: u64,
    prev_log_number: u64,
}

impl VersionSet {
    pub fn new(dbname: &Path, options: &Options, table_cache: Arc<TableCache>) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let current = Arc::new(Version::new(icmp.clone(), Arc::clone(&table_cache)));
        VersionSet {
            dbname: dbname.to_path_buf(),
            options: options.clone(),
            icmp,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            live: vec![Arc::downgrade(&current)],
            current,
            compact_pointer: vec![Vec::new(); NUM_LEVELS],
            table_cache,
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub fn table_cache(&self) -> &Arc<TableCache> {
        &self.table_cache
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Give back a number from `new_file_number` that ended up unused.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.current.level_bytes(level)
    }

    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0 || self.current.file_to_compact().is_some()
    }

    /// "files[ 1 2 0 0 0 0 0 ]"
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = (0..NUM_LEVELS).map(|l| self.num_level_files(l).to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }

    /// File numbers referenced by any version still in use.
    pub fn live_files(&mut self) -> HashSet<u64> {
        self.live.retain(|v| v.strong_count() > 0);
        let mut live = HashSet::new();
        for version in self.live.iter().filter_map(Weak::upgrade) {
            for files in &version.files {
                live.extend(files.iter().map(|f| f.number));
            }
        }
        live
    }

    fn append_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.live.retain(|v| v.strong_count() > 0);
        self.live.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Apply `edit` to the current version and prepare its manifest record.
    /// Fills in the counters the edit leaves unset.
    pub fn prepare_apply(&mut self, edit: &mut VersionEdit) -> Result<PendingApply> {
        match edit.log_number {
            Some(n) if n < self.log_number || n >= self.next_file_number => {
                return Err(Error::invalid_argument(format!("log number {n} out of range")));
            }
            Some(_) => {}
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut builder = VersionBuilder::new(&self.icmp, &self.current);
        builder.apply(edit, &mut self.compact_pointer);
        let mut version = builder.save_to(Arc::clone(&self.table_cache))?;
        self.finalize(&mut version);

        let create = match &self.descriptor_log {
            Some(_) => None,
            None => Some((self.manifest_file_number, self.write_snapshot())),
        };
        Ok(PendingApply {
            manifest: ManifestWrite {
                dbname: self.dbname.clone(),
                writer: self.descriptor_log.take(),
                create,
                record: edit.encode(),
            },
            version,
            log_number: edit.log_number.unwrap_or(self.log_number),
            prev_log_number: edit.prev_log_number.unwrap_or(self.prev_log_number),
        })
    }

    /// Install the version once its manifest write finished.
    pub fn finish_apply(&mut self, pending: PendingApply, written: Result<()>) -> Result<()> {
        let PendingApply {
            manifest,
            version,
            log_number,
            prev_log_number,
        } = pending;
        match written {
            Ok(()) => {
                self.descriptor_log = manifest.writer;
                self.append_version(version);
                self.log_number = log_number;
                self.prev_log_number = prev_log_number;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "manifest write failed");
                if let Some((number, _)) = manifest.create {
                    drop(manifest.writer);
                    let _ = std::fs::remove_file(descriptor_file_name(&self.dbname, number));
                } else {
                    self.descriptor_log = manifest.writer;
                }
                Err(e)
            }
        }
    }

    /// Apply an edit, writing the manifest in place.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        let mut pending = self.prepare_apply(edit)?;
        let written = pending.manifest.write();
        self.finish_apply(pending, written)
    }

    /// Rebuild state from CURRENT and the manifest it names.
    pub fn recover(&mut self) -> Result<()> {
        let current = match std::fs::read_to_string(current_file_name(&self.dbname)) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("{}: CURRENT missing", self.dbname.display())));
            }
            Err(e) => return Err(e.into()),
        };
        let Some(name) = current.strip_suffix('\n').filter(|n| !n.is_empty()) else {
            return Err(Error::corruption("CURRENT file does not end with newline"));
        };
        let manifest_path = self.dbname.join(name);
        let file = File::open(&manifest_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::corruption(format!("CURRENT points to a non-existent file {name}"))
            } else {
                e.into()
            }
        })?;

        let reporter = Arc::new(RecordingReporter::new(name));
        let reporter_dyn: Arc<dyn CorruptionReporter> = reporter.clone();
        let mut reader = LogReader::new(BufReader::new(file), Some(reporter_dyn), true, 0).strict(true);

        let mut builder = VersionBuilder::new(&self.icmp, &self.current);
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file = None;
        let mut last_sequence = None;

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;
            if let Some(cmp_name) = &edit.comparator {
                if cmp_name != self.icmp.user_comparator().name() {
                    return Err(Error::invalid_argument(format!(
                        "{cmp_name} does not match existing comparator {}",
                        self.icmp.user_comparator().name()
                    )));
                }
            }
            builder.apply(&edit, &mut self.compact_pointer);
            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file = edit.next_file_number.or(next_file);
            last_sequence = edit.last_sequence.or(last_sequence);
        }
        if let Some(e) = reporter.take_error() {
            return Err(e);
        }

        let next_file = next_file.ok_or_else(|| Error::corruption("no meta-nextfile entry in descriptor"))?;
        let log_number = log_number.ok_or_else(|| Error::corruption("no meta-lognumber entry in descriptor"))?;
        let last_sequence =
            last_sequence.ok_or_else(|| Error::corruption("no last-sequence-number entry in descriptor"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = builder.save_to(Arc::clone(&self.table_cache))?;
        self.finalize(&mut version);
        self.append_version(version);

        self.next_file_number = next_file;
        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);
        // never reuse the manifest: the next edit starts a fresh one
        self.manifest_file_number = self.new_file_number();
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        tracing::info!(
            manifest = name,
            next_file = self.next_file_number,
            last_sequence,
            log_number,
            files = %self.level_summary(),
            "recovered version set"
        );
        Ok(())
    }

    /// Full description of the current state, as the first record of a
    /// fresh manifest.
    fn write_snapshot(&self) -> Vec<u8> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        for (level, pointer) in self.compact_pointer.iter().enumerate() {
            if !pointer.is_empty() {
                edit.set_compact_pointer(level, InternalKey::decode_from(pointer));
            }
        }
        for (level, files) in self.current.files.iter().enumerate() {
            for f in files {
                edit.add_file(level, FileMetaData::clone(f));
            }
        }
        edit.encode()
    }

    /// Compute which level most needs compaction.
    fn finalize(&self, version: &mut Version) {
        let mut best_level = None;
        let mut best_score = -1.0;
        for level in 0..NUM_LEVELS - 1 {
            let score = if level == 0 {
                // Bounded by file count rather than bytes: every level-0
                // file is merged on each read.
                version.files[0].len() as f64 / L0_COMPACTION_TRIGGER as f64
            } else {
                total_file_size(&version.files[level]) as f64 / max_bytes_for_level(level)
            };
            if score > best_score {
                best_level = Some(level);
                best_score = score;
            }
        }
        version.compaction_level = best_level;
        version.compaction_score = best_score;
    }

    /// Pick the next automatic compaction: size-triggered first, then
    /// seek-triggered. `None` when nothing is due.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = Arc::clone(&self.current);
        let mut c = if current.compaction_score >= 1.0 {
            let level = current.compaction_level?;
            let mut c = Compaction::new(level, self.options.max_file_size, Arc::clone(&current), self.icmp.clone());
            let pointer = &self.compact_pointer[level];
            let first = current.files[level]
                .iter()
                .find(|f| pointer.is_empty() || self.icmp.compare(f.largest.encode(), pointer) == Ordering::Greater)
                // wrap around to the beginning of the key space
                .or_else(|| current.files[level].first())?;
            c.inputs[0].push(Arc::clone(first));
            c
        } else if let Some((file, level)) = current.file_to_compact() {
            let mut c = Compaction::new(level, self.options.max_file_size, Arc::clone(&current), self.icmp.clone());
            c.inputs[0].push(file);
            c
        } else {
            return None;
        };

        if c.level() == 0 {
            let (smallest, largest) = get_range(&self.icmp, &c.inputs[0]);
            c.inputs[0] = current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
        }
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// A compaction of the files in `level` overlapping `[begin, end]`.
    pub fn compact_range(&mut self, level: usize, begin: Option<&InternalKey>, end: Option<&InternalKey>) -> Option<Compaction> {
        if level + 1 >= NUM_LEVELS {
            return None;
        }
        let current = Arc::clone(&self.current);
        let mut inputs = current.get_overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }
        // Bound the work of one step; level-0 files overlap so they go
        // together.
        if level > 0 {
            let limit = self.options.max_file_size;
            let mut total = 0;
            if let Some(cut) = inputs.iter().position(|f| {
                total += f.file_size;
                total >= limit
            }) {
                inputs.truncate(cut + 1);
            }
        }
        let mut c = Compaction::new(level, self.options.max_file_size, current, self.icmp.clone());
        c.inputs[0] = inputs;
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    fn setup_other_inputs(&mut self, c: &mut Compaction) {
        let current = Arc::clone(c.input_version());
        let level = c.level();
        let icmp = &self.icmp;

        add_boundary_inputs(icmp, &current.files[level], &mut c.inputs[0]);
        let (mut smallest, mut largest) = get_range(icmp, &c.inputs[0]);

        c.inputs[1] = current.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        add_boundary_inputs(icmp, &current.files[level + 1], &mut c.inputs[1]);

        let (mut all_start, mut all_limit) = get_range2(icmp, &c.inputs[0], &c.inputs[1]);

        // Grow the level inputs if that pulls in no more next-level files.
        if !c.inputs[1].is_empty() {
            let mut expanded0 = current.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            add_boundary_inputs(icmp, &current.files[level], &mut expanded0);
            let inputs1_size = total_file_size(&c.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > c.inputs[0].len()
                && inputs1_size + expanded0_size < expanded_compaction_byte_size_limit(self.options.max_file_size)
            {
                let (new_start, new_limit) = get_range(icmp, &expanded0);
                let mut expanded1 = current.get_overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
                add_boundary_inputs(icmp, &current.files[level + 1], &mut expanded1);
                if expanded1.len() == c.inputs[1].len() {
                    tracing::info!(
                        level,
                        from = %format!("{}+{} ({}+{} bytes)", c.inputs[0].len(), c.inputs[1].len(),
                            total_file_size(&c.inputs[0]), inputs1_size),
                        to = %format!("{}+{} ({}+{} bytes)", expanded0.len(), expanded1.len(),
                            expanded0_size, inputs1_size),
                        "expanding compaction inputs"
                    );
                    smallest = new_start;
                    largest = new_limit;
                    c.inputs[0] = expanded0;
                    c.inputs[1] = expanded1;
                    (all_start, all_limit) = get_range2(icmp, &c.inputs[0], &c.inputs[1]);
                }
            }
        }
        debug_assert!(self.icmp.compare(smallest.encode(), largest.encode()) != Ordering::Greater);

        if level + 2 < NUM_LEVELS {
            c.grandparents = current.get_overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
        }

        // Start the next compaction of this level after this range, even
        // if this one fails.
        self.compact_pointer[level] = largest.encode().to_vec();
        c.edit().set_compact_pointer(level, largest);
    }
}

/// Smallest and largest internal key across `files` (non-empty).
fn get_range(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
    let mut smallest = InternalKey::default();
    let mut largest = InternalKey::default();
    for (i, f) in files.iter().enumerate() {
        if i == 0 || icmp.compare(f.smallest.encode(), smallest.encode()) == Ordering::Less {
            smallest = f.smallest.clone();
        }
        if i == 0 || icmp.compare(f.largest.encode(), largest.encode()) == Ordering::Greater {
            largest = f.largest.clone();
        }
    }
    (smallest, largest)
}

fn get_range2(
    icmp: &InternalKeyComparator,
    a: &[Arc<FileMetaData>],
    b: &[Arc<FileMetaData>],
) -> (InternalKey, InternalKey) {
    let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
    get_range(icmp, &all)
}

/// Pull in files of the same level whose smallest key shares a user key
/// with the largest key already chosen. Otherwise a compaction could move
/// the newer version of a user key down a level and leave an older one
/// behind, where it would shadow the newer.
pub(crate) fn add_boundary_inputs(
    icmp: &InternalKeyComparator,
    level_files: &[Arc<FileMetaData>],
    compaction_files: &mut Vec<Arc<FileMetaData>>,
) {
    if compaction_files.is_empty() {
        return;
    }
    let (_, mut largest) = get_range(icmp, compaction_files);
    loop {
        let boundary = level_files
            .iter()
            .filter(|f| {
                icmp.compare(f.smallest.encode(), largest.encode()) == Ordering::Greater
                    && icmp.compare_user(f.smallest.user_key(), largest.user_key()) == Ordering::Equal
            })
            .min_by(|a, b| icmp.compare(a.smallest.encode(), b.smallest.encode()));
        match boundary {
            Some(f) => {
                largest = f.largest.clone();
                compaction_files.push(Arc::clone(f));
            }
            None => break,
        }
    }
}

/// Accumulates edits on top of a base version.
struct VersionBuilder<'a> {
    icmp: &'a InternalKeyComparator,
    base: &'a Version,
    deleted: Vec<HashSet<u64>>,
    added: Vec<Vec<Arc<FileMetaData>>>,
}

impl<'a> VersionBuilder<'a> {
    fn new(icmp: &'a InternalKeyComparator, base: &'a Version) -> Self {
        VersionBuilder {
            icmp,
            base,
            deleted: vec![HashSet::new(); NUM_LEVELS],
            added: vec![Vec::new(); NUM_LEVELS],
        }
    }

    fn apply(&mut self, edit: &VersionEdit, compact_pointer: &mut [Vec<u8>]) {
        for (level, key) in &edit.compact_pointers {
            compact_pointer[*level] = key.encode().to_vec();
        }
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, f) in &edit.new_files {
            let f = FileMetaData::new(f.number, f.file_size, f.smallest.clone(), f.largest.clone());
            f.allowed_seeks
                .store(initial_allowed_seeks(f.file_size), std::sync::atomic::Ordering::Relaxed);
            self.deleted[*level].remove(&f.number);
            self.added[*level].push(Arc::new(f));
        }
    }

    fn save_to(self, table_cache: Arc<TableCache>) -> Result<Version> {
        let mut version = Version::new(self.icmp.clone(), table_cache);
        for level in 0..NUM_LEVELS {
            let mut files: Vec<Arc<FileMetaData>> = self.base.files[level]
                .iter()
                .chain(self.added[level].iter())
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();
            files.sort_by(|a, b| {
                self.icmp
                    .compare(a.smallest.encode(), b.smallest.encode())
                    .then(a.number.cmp(&b.number))
            });
            if level > 0 {
                for pair in files.windows(2) {
                    if self.icmp.compare(pair[0].largest.encode(), pair[1].smallest.encode()) != Ordering::Less {
                        return Err(Error::corruption(format!(
                            "overlapping ranges in level {level}: {:?} vs {:?}",
                            pair[0], pair[1]
                        )));
                    }
                }
            }
            version.files[level] = files;
        }
        Ok(version)
    }
}
