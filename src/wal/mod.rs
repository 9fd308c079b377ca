//! Write-ahead log.
//!
//! A log file is a sequence of 32 KiB physical blocks. Each logical record
//! is split into one or more chunks, each framed by a 7-byte header, so a
//! reader can resynchronize at the next block boundary after damage. The same
//! framing is used for the manifest.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::LogReader;
pub use record::RecordType;
pub use writer::LogWriter;

/// Size of one physical block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// checksum (4) + length (2) + type (1)
pub const HEADER_SIZE: usize = 4 + 2 + 1;
