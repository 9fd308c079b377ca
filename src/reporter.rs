//! Corruption reporting shared by the log reader and the table reader.

use parking_lot::Mutex;

use crate::error::Error;

/// Whether reading can continue past the damaged region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// The damaged bytes were skipped; later data is still readable.
    Recoverable,
    /// The read that hit the damage was failed.
    Unrecoverable,
}

/// Receives every corruption the readers detect.
///
/// `offset` is the file offset of the damaged region and `bytes` its length,
/// as far as the reader can tell.
pub trait CorruptionReporter: Send + Sync {
    fn report(&self, kind: CorruptionKind, offset: u64, bytes: usize, reason: &str);
}

/// Logs corruption through `tracing` and otherwise ignores it.
#[derive(Debug, Clone)]
pub struct LogReporter {
    pub source: String,
}

impl LogReporter {
    pub fn new(source: impl Into<String>) -> Self {
        LogReporter { source: source.into() }
    }
}

impl CorruptionReporter for LogReporter {
    fn report(&self, kind: CorruptionKind, offset: u64, bytes: usize, reason: &str) {
        tracing::warn!(
            source = %self.source,
            ?kind,
            offset,
            bytes,
            reason,
            "corruption detected"
        );
    }
}

/// Logs like [`LogReporter`] and remembers the first report so the caller can
/// turn it into an error afterwards (paranoid recovery).
#[derive(Debug)]
pub struct RecordingReporter {
    inner: LogReporter,
    first: Mutex<Option<Error>>,
    dropped_bytes: Mutex<usize>,
}

impl RecordingReporter {
    pub fn new(source: impl Into<String>) -> Self {
        RecordingReporter {
            inner: LogReporter::new(source),
            first: Mutex::new(None),
            dropped_bytes: Mutex::new(0),
        }
    }

    pub fn take_error(&self) -> Option<Error> {
        self.first.lock().take()
    }

    pub fn dropped_bytes(&self) -> usize {
        *self.dropped_bytes.lock()
    }
}

impl CorruptionReporter for RecordingReporter {
    fn report(&self, kind: CorruptionKind, offset: u64, bytes: usize, reason: &str) {
        self.inner.report(kind, offset, bytes, reason);
        *self.dropped_bytes.lock() += bytes;
        let mut first = self.first.lock();
        if first.is_none() {
            *first = Some(Error::corruption(format!(
                "{}: {reason} ({bytes} bytes at offset {offset})",
                self.inner.source
            )));
        }
    }
}
