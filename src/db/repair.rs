//! Best-effort reconstruction of a database whose manifest is lost or
//! damaged.
//!
//! Every log is converted into a table, every table is scanned for its
//! key range and newest sequence number, and a fresh manifest placing all
//! tables in level 0 is written. Files that cannot be read are moved to
//! `lost/` rather than deleted. Level structure is rebuilt by compaction
//! on the next open.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::WriteBatch;
use crate::cache::Cache;
use crate::comparator::InternalKeyComparator;
use crate::db::builder::build_table;
use crate::db::filename::{
    descriptor_file_name, log_file_name, parse_file_name, set_current_file, table_file_name, temp_file_name, FileType,
};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::memtable::MemTable;
use crate::options::Options;
use crate::reporter::{CorruptionReporter, LogReporter};
use crate::sstable::TableOptions;
use crate::table_cache::TableCache;
use crate::types::{InternalKey, ParsedInternalKey, SequenceNumber};
use crate::version::{FileMetaData, VersionEdit};
use crate::wal::{LogReader, LogWriter};

/// Rebuild the manifest of the database at `path` from the logs and
/// tables found there.
pub fn repair_db(path: impl AsRef<Path>, options: &Options) -> Result<()> {
    let options = options.sanitize()?;
    Repairer::new(path.as_ref(), &options).run()
}

struct Repairer {
    dbname: PathBuf,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    write_buffer_size: usize,

    manifests: Vec<PathBuf>,
    logs: Vec<u64>,
    /// Table numbers with the path each was found under.
    table_files: Vec<(u64, PathBuf)>,
    tables: Vec<FileMetaData>,
    next_file_number: u64,
    max_sequence: SequenceNumber,
}

impl Repairer {
    fn new(dbname: &Path, options: &Options) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        // Tables are read once; a tiny cache is enough.
        let table_cache = Arc::new(TableCache::new(
            dbname,
            TableOptions::for_db(options, &icmp),
            10 + 10,
            Arc::new(Cache::new(1)),
        ));
        Repairer {
            dbname: dbname.to_path_buf(),
            icmp,
            table_cache,
            write_buffer_size: options.write_buffer_size,
            manifests: Vec::new(),
            logs: Vec::new(),
            table_files: Vec::new(),
            tables: Vec::new(),
            next_file_number: 1,
            max_sequence: 0,
        }
    }

    fn run(mut self) -> Result<()> {
        self.find_files()?;
        self.convert_logs_to_tables();
        self.extract_metadata();
        self.write_descriptor()?;

        let bytes: u64 = self.tables.iter().map(|t| t.file_size).sum();
        tracing::info!(
            path = %self.dbname.display(),
            tables = self.tables.len(),
            bytes,
            max_sequence = self.max_sequence,
            "repair finished; some data may have been lost"
        );
        Ok(())
    }

    fn find_files(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dbname).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("{}: no such database", self.dbname.display()))
            } else {
                e.into()
            }
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((number, file_type)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            match file_type {
                FileType::Descriptor => self.manifests.push(entry.path()),
                FileType::Log => self.logs.push(number),
                FileType::Table => self.table_files.push((number, entry.path())),
                _ => {}
            }
            if file_type != FileType::Current && file_type != FileType::InfoLog {
                self.next_file_number = self.next_file_number.max(number + 1);
            }
        }
        if self.logs.is_empty() && self.table_files.is_empty() && self.manifests.is_empty() {
            return Err(Error::NotFound(format!("{}: no database files", self.dbname.display())));
        }
        // MANIFEST-000001 is rewritten below.
        self.next_file_number = self.next_file_number.max(2);
        self.logs.sort_unstable();
        self.table_files.sort();
        Ok(())
    }

    fn convert_logs_to_tables(&mut self) {
        for number in std::mem::take(&mut self.logs) {
            let path = log_file_name(&self.dbname, number);
            if let Err(e) = self.convert_log_to_table(number, &path) {
                tracing::warn!(log = number, error = %e, "log conversion failed; ignoring");
            }
            self.archive(&path);
        }
    }

    fn convert_log_to_table(&mut self, log: u64, path: &Path) -> Result<()> {
        let reporter: Arc<dyn CorruptionReporter> = Arc::new(LogReporter::new(path.display().to_string()));
        let mut reader = LogReader::open(path, Some(reporter))?;
        let mut mem = Arc::new(MemTable::new(self.icmp.clone()));
        let mut batches = 0;

        while let Some(record) = reader.read_record()? {
            let batch = match WriteBatch::from_contents(record) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(log, error = %e, "skipping bad log record");
                    continue;
                }
            };
            if let Err(e) = batch.insert_into(&mem) {
                tracing::warn!(log, error = %e, "skipping bad batch");
                continue;
            }
            batches += 1;
            // A huge log is split into several tables to bound memory.
            if mem.approximate_memory_usage() > self.write_buffer_size {
                self.write_table(log, &mem)?;
                mem = Arc::new(MemTable::new(self.icmp.clone()));
            }
        }
        if !mem.is_empty() {
            self.write_table(log, &mem)?;
        }
        tracing::info!(log, batches, "log replayed");
        Ok(())
    }

    fn write_table(&mut self, log: u64, mem: &Arc<MemTable>) -> Result<()> {
        let number = self.next_file_number;
        self.next_file_number += 1;
        let mut iter = mem.iter();
        if let Some(meta) = build_table(&self.dbname, &self.table_cache, &mut iter, number)? {
            tracing::info!(log, table = number, bytes = meta.file_size, "log converted to table");
            self.table_files.push((number, table_file_name(&self.dbname, number)));
        }
        Ok(())
    }

    fn extract_metadata(&mut self) {
        for (number, path) in std::mem::take(&mut self.table_files) {
            match self.scan_table(number, &path) {
                Ok(Some(meta)) => self.tables.push(meta),
                Ok(None) => {
                    tracing::warn!(table = number, "table has no entries");
                    self.archive(&path);
                }
                Err(e) => {
                    tracing::warn!(table = number, error = %e, "table unreadable");
                    self.table_cache.evict(number);
                    self.archive(&path);
                }
            }
        }
    }

    /// Key range and size of a table; every entry must parse.
    fn scan_table(&mut self, number: u64, path: &Path) -> Result<Option<FileMetaData>> {
        let file_size = std::fs::metadata(path)?.len();
        let mut iter = self.table_cache.iter(number, file_size, true, false)?;
        iter.seek_to_first()?;
        let mut smallest: Option<Vec<u8>> = None;
        let mut largest = Vec::new();
        let mut entries = 0u64;
        while iter.is_valid() {
            let parsed = ParsedInternalKey::parse(iter.key())?;
            self.max_sequence = self.max_sequence.max(parsed.sequence);
            if smallest.is_none() {
                smallest = Some(iter.key().to_vec());
            }
            largest.clear();
            largest.extend_from_slice(iter.key());
            entries += 1;
            iter.next()?;
        }
        tracing::debug!(table = number, entries, "table scanned");
        Ok(smallest.map(|smallest| {
            FileMetaData::new(
                number,
                file_size,
                InternalKey::decode_from(&smallest),
                InternalKey::decode_from(&largest),
            )
        }))
    }

    fn write_descriptor(&mut self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        edit.set_log_number(0);
        edit.set_next_file(self.next_file_number);
        edit.set_last_sequence(self.max_sequence);
        for meta in &self.tables {
            edit.add_file(0, meta.clone());
        }

        let tmp = temp_file_name(&self.dbname, 1);
        let written = (|| -> Result<()> {
            let mut writer = LogWriter::create(&tmp)?;
            writer.add_record(&edit.encode())?;
            writer.sync()
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        for manifest in std::mem::take(&mut self.manifests) {
            self.archive(&manifest);
        }
        std::fs::rename(&tmp, descriptor_file_name(&self.dbname, 1))?;
        set_current_file(&self.dbname, 1)
    }

    /// Move a file into `lost/` so its contents stay inspectable.
    fn archive(&self, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        let lost = self.dbname.join("lost");
        let result = std::fs::create_dir_all(&lost).and_then(|()| std::fs::rename(path, lost.join(name)));
        match result {
            Ok(()) => tracing::info!(file = ?name, "archived"),
            Err(e) => tracing::warn!(file = ?name, error = %e, "archive failed"),
        }
    }
}
