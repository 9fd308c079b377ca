use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::MutexGuard;

use crate::batch::WriteBatch;
use crate::db::filename::log_file_name;
use crate::db::{DbInner, DbState, WalState};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::options::WriteOptions;
use crate::version::{L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER};
use crate::wal::LogWriter;

impl DbInner {
    /// Commit `batch`: log it, then insert it into the memtable. `None`
    /// only forces a memtable switch.
    ///
    /// Writers queue on `writer_lock`; the engine lock is taken only to
    /// read and publish the sequence number, so log appends and memtable
    /// inserts do not block readers.
    pub(crate) fn write(&self, options: &WriteOptions, batch: Option<WriteBatch>) -> Result<()> {
        let _writer = self.writer_lock.lock();
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let force = batch.is_none();
        let mem = self.make_room_for_write(force)?;
        let Some(mut batch) = batch else {
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }

        let last_sequence = self.state.lock().versions.last_sequence();
        batch.set_sequence(last_sequence + 1);
        let last_sequence = last_sequence + u64::from(batch.count());

        let logged = {
            let mut wal = self.wal.lock();
            let wal = wal.as_mut().ok_or(Error::Closed)?;
            wal.writer.add_record(batch.contents()).and_then(|()| {
                if options.sync {
                    wal.writer.sync()
                } else {
                    Ok(())
                }
            })
        };
        if let Err(e) = logged {
            // The log may now hold a partial record; later writes could
            // land behind it, so stop accepting them.
            let mut state = self.state.lock();
            self.record_background_error(&mut state, e.clone());
            return Err(e);
        }

        batch.insert_into(&mem)?;
        self.state.lock().versions.set_last_sequence(last_sequence);
        Ok(())
    }

    /// Make sure the memtable has room for a write, stalling or switching
    /// to a fresh memtable and log as needed. Returns the memtable to
    /// insert into.
    fn make_room_for_write(&self, mut force: bool) -> Result<Arc<MemTable>> {
        let mut allow_delay = !force;
        let mut state = self.state.lock();
        loop {
            if let Some(e) = &state.bg_error {
                return Err(Error::Background(Box::new(e.clone())));
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            // Level-0 backpressure only applies while compactions can
            // drain level 0.
            let compacting = !self.suspended.load(Ordering::Acquire);
            let l0_files = state.versions.num_level_files(0);

            if allow_delay && compacting && l0_files >= L0_SLOWDOWN_WRITES_TRIGGER {
                // Hand the compactor some CPU instead of stalling one write
                // for seconds once the hard limit is hit.
                MutexGuard::unlocked(&mut state, || std::thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
                continue;
            }
            if !force && state.mem.approximate_memory_usage() <= self.options.write_buffer_size {
                return Ok(Arc::clone(&state.mem));
            }
            if state.imm.is_some() {
                tracing::info!("memtable full; waiting for flush");
                self.bg_cv.wait(&mut state);
                continue;
            }
            if compacting && l0_files >= L0_STOP_WRITES_TRIGGER {
                tracing::warn!(l0_files, "too many level-0 files; waiting");
                self.bg_cv.wait(&mut state);
                continue;
            }

            self.switch_memtable(&mut state)?;
            force = false;
        }
    }

    /// Freeze the memtable and start a new one backed by a new log.
    fn switch_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let number = state.versions.new_file_number();
        let path = log_file_name(&self.dbname, number);
        let writer = match MutexGuard::unlocked(state, || LogWriter::create(&path)) {
            Ok(w) => w,
            Err(e) => {
                state.versions.reuse_file_number(number);
                return Err(e);
            }
        };
        // The old writer is dropped (and closed) here.
        *self.wal.lock() = Some(WalState { writer, number });
        state.logfile_number = number;

        let frozen = std::mem::replace(&mut state.mem, Arc::new(MemTable::new(self.icmp.clone())));
        tracing::debug!(
            log = number,
            frozen_bytes = frozen.approximate_memory_usage(),
            "switched memtable"
        );
        state.imm = Some(frozen);
        self.has_imm.store(true, Ordering::Release);
        self.maybe_schedule_compaction(state);
        Ok(())
    }
}
