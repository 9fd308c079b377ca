use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::batch::{WriteBatch, BATCH_HEADER_SIZE};
use crate::db::filename::{current_file_name, descriptor_file_name, log_file_name, parse_file_name, set_current_file, FileType};
use crate::db::{DbInner, DbState};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::reporter::{CorruptionKind, CorruptionReporter, RecordingReporter};
use crate::types::SequenceNumber;
use crate::version::VersionEdit;
use crate::wal::{LogReader, LogWriter};

impl DbInner {
    /// Write the manifest of an empty database and point CURRENT at it.
    fn new_db(&self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        edit.set_log_number(0);
        edit.set_next_file(2);
        edit.set_last_sequence(0);

        let manifest = descriptor_file_name(&self.dbname, 1);
        let result = (|| -> Result<()> {
            let mut writer = LogWriter::create(&manifest)?;
            writer.add_record(&edit.encode())?;
            writer.sync()?;
            set_current_file(&self.dbname, 1)
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&manifest);
        }
        tracing::info!(path = %self.dbname.display(), "created new database");
        result
    }

    /// Load the version set and replay the logs it does not cover yet.
    /// Returns the edit recording tables flushed during replay; the caller
    /// adds the new log number and applies it.
    pub(crate) fn recover(&self, state: &mut MutexGuard<'_, DbState>) -> Result<VersionEdit> {
        std::fs::create_dir_all(&self.dbname)?;

        if !current_file_name(&self.dbname).exists() {
            if !self.options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    self.dbname.display()
                )));
            }
            self.new_db()?;
        } else if self.options.error_if_exists {
            return Err(Error::invalid_argument(format!(
                "{}: exists (error_if_exists is true)",
                self.dbname.display()
            )));
        }

        state.versions.recover()?;

        // Every table the manifest names must be on disk; logs newer than
        // the manifest's log number hold writes not yet in any table.
        let min_log = state.versions.log_number();
        let prev_log = state.versions.prev_log_number();
        let mut expected: HashSet<u64> = state.versions.live_files();
        let mut logs = Vec::new();
        for entry in std::fs::read_dir(&self.dbname)?.flatten() {
            let name = entry.file_name();
            let Some((number, file_type)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            expected.remove(&number);
            if file_type == FileType::Log && (number >= min_log || number == prev_log) {
                logs.push(number);
            }
        }
        if let Some(missing) = expected.iter().min() {
            return Err(Error::corruption(format!(
                "{} missing files; e.g. table {missing:06}",
                expected.len()
            )));
        }

        logs.sort_unstable();
        let mut edit = VersionEdit::new();
        let mut max_sequence = 0;
        for number in logs {
            self.recover_log_file(state, number, &mut edit, &mut max_sequence)?;
            // The log may postdate the manifest's next-file counter.
            state.versions.mark_file_number_used(number);
        }
        if state.versions.last_sequence() < max_sequence {
            state.versions.set_last_sequence(max_sequence);
        }
        Ok(edit)
    }

    fn recover_log_file(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        number: u64,
        edit: &mut VersionEdit,
        max_sequence: &mut SequenceNumber,
    ) -> Result<()> {
        let path = log_file_name(&self.dbname, number);
        let reporter = Arc::new(RecordingReporter::new(path.display().to_string()));
        let reporter_dyn: Arc<dyn CorruptionReporter> = reporter.clone();
        let mut reader = LogReader::open(&path, Some(reporter_dyn))?;
        tracing::info!(log = number, "recovering log");

        let mut mem: Option<Arc<MemTable>> = None;
        let mut records = 0u64;
        let mut flushed = 0usize;
        while let Some(record) = reader.read_record()? {
            if record.len() < BATCH_HEADER_SIZE {
                reporter.report(
                    CorruptionKind::Recoverable,
                    reader.last_record_offset(),
                    record.len(),
                    "log record too small",
                );
                continue;
            }
            let batch = WriteBatch::from_contents(record)?;
            let table = match &mem {
                Some(m) => Arc::clone(m),
                None => {
                    let m = Arc::new(MemTable::new(self.icmp.clone()));
                    mem = Some(Arc::clone(&m));
                    m
                }
            };
            if let Err(e) = batch.insert_into(&table) {
                if self.options.paranoid_checks {
                    return Err(e);
                }
                tracing::warn!(log = number, error = %e, "ignoring bad batch in log");
                continue;
            }
            records += 1;
            if batch.count() > 0 {
                let last = batch.sequence() + u64::from(batch.count()) - 1;
                *max_sequence = (*max_sequence).max(last);
            }

            if table.approximate_memory_usage() > self.options.write_buffer_size {
                flushed += 1;
                self.write_level0_table(state, &table, edit, false)?;
                mem = None;
            }
        }

        if self.options.paranoid_checks {
            if let Some(e) = reporter.take_error() {
                return Err(e);
            }
        }
        if let Some(table) = mem {
            if !table.is_empty() {
                self.write_level0_table(state, &table, edit, false)?;
            }
        }
        tracing::info!(
            log = number,
            records,
            flushed,
            dropped_bytes = reporter.dropped_bytes(),
            "log recovered"
        );
        Ok(())
    }
}
