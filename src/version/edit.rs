use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::coding::{put_length_prefixed_slice, put_varint32, put_varint64, SliceReader};
use crate::error::{Error, Result};
use crate::types::InternalKey;
use crate::version::NUM_LEVELS;

/// Tags of the fields in an encoded edit. Numbers are persisted.
mod tag {
    pub const COMPARATOR: u32 = 1;
    pub const LOG_NUMBER: u32 = 2;
    pub const NEXT_FILE_NUMBER: u32 = 3;
    pub const LAST_SEQUENCE: u32 = 4;
    pub const COMPACT_POINTER: u32 = 5;
    pub const DELETED_FILE: u32 = 6;
    pub const NEW_FILE: u32 = 7;
    // 8 was used for large value refs
    pub const PREV_LOG_NUMBER: u32 = 9;
}

/// One table file of a version.
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    /// Lookups left before this file is nominated for compaction.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(1 << 30),
        }
    }
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        FileMetaData {
            number: self.number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            allowed_seeks: AtomicI64::new(self.allowed_seeks.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.file_size == other.file_size
            && self.smallest == other.smallest
            && self.largest == other.largest
    }
}

impl fmt::Debug for FileMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{:?} .. {:?}]",
            self.number, self.file_size, self.smallest, self.largest
        )
    }
}

/// A delta between two versions, as recorded in the manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Add the specified file at the specified level.
    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, file));
    }

    /// Delete the specified file from the specified level.
    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::new();
        if let Some(name) = &self.comparator {
            put_varint32(&mut dst, tag::COMPARATOR);
            put_length_prefixed_slice(&mut dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut dst, tag::LOG_NUMBER);
            put_varint64(&mut dst, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(&mut dst, tag::PREV_LOG_NUMBER);
            put_varint64(&mut dst, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut dst, tag::NEXT_FILE_NUMBER);
            put_varint64(&mut dst, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut dst, tag::LAST_SEQUENCE);
            put_varint64(&mut dst, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut dst, tag::COMPACT_POINTER);
            put_varint32(&mut dst, *level as u32);
            put_length_prefixed_slice(&mut dst, key.encode());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut dst, tag::DELETED_FILE);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, *number);
        }
        for (level, f) in &self.new_files {
            put_varint32(&mut dst, tag::NEW_FILE);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, f.number);
            put_varint64(&mut dst, f.file_size);
            put_length_prefixed_slice(&mut dst, f.smallest.encode());
            put_length_prefixed_slice(&mut dst, f.largest.encode());
        }
        dst
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut input = src;
        while !input.is_empty() {
            let t = input.read_varint32().map_err(|_| bad("tag"))?;
            match t {
                tag::COMPARATOR => {
                    let name = input.read_length_prefixed().map_err(|_| bad("comparator name"))?;
                    let name = std::str::from_utf8(name).map_err(|_| bad("comparator name"))?;
                    edit.comparator = Some(name.to_string());
                }
                tag::LOG_NUMBER => {
                    edit.log_number = Some(input.read_varint64().map_err(|_| bad("log number"))?);
                }
                tag::PREV_LOG_NUMBER => {
                    edit.prev_log_number =
                        Some(input.read_varint64().map_err(|_| bad("previous log number"))?);
                }
                tag::NEXT_FILE_NUMBER => {
                    edit.next_file_number =
                        Some(input.read_varint64().map_err(|_| bad("next file number"))?);
                }
                tag::LAST_SEQUENCE => {
                    edit.last_sequence = Some(input.read_varint64().map_err(|_| bad("last sequence number"))?);
                }
                tag::COMPACT_POINTER => {
                    let level = read_level(&mut input).ok_or_else(|| bad("compaction pointer"))?;
                    let key = read_internal_key(&mut input).ok_or_else(|| bad("compaction pointer"))?;
                    edit.compact_pointers.push((level, key));
                }
                tag::DELETED_FILE => {
                    let level = read_level(&mut input).ok_or_else(|| bad("deleted file"))?;
                    let number = input.read_varint64().map_err(|_| bad("deleted file"))?;
                    edit.deleted_files.insert((level, number));
                }
                tag::NEW_FILE => {
                    let file = (|| {
                        let level = read_level(&mut input)?;
                        let number = input.read_varint64().ok()?;
                        let file_size = input.read_varint64().ok()?;
                        let smallest = read_internal_key(&mut input)?;
                        let largest = read_internal_key(&mut input)?;
                        Some((level, FileMetaData::new(number, file_size, smallest, largest)))
                    })()
                    .ok_or_else(|| bad("new-file entry"))?;
                    edit.new_files.push(file);
                }
                _ => return Err(bad("unknown tag")),
            }
        }
        Ok(edit)
    }
}

fn bad(what: &str) -> Error {
    Error::corruption(format!("VersionEdit: {what}"))
}

fn read_level(input: &mut &[u8]) -> Option<usize> {
    let level = input.read_varint32().ok()? as usize;
    (level < NUM_LEVELS).then_some(level)
}

fn read_internal_key(input: &mut &[u8]) -> Option<InternalKey> {
    let encoded = input.read_length_prefixed().ok()?;
    (encoded.len() >= 8).then(|| InternalKey::decode_from(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    #[test]
    fn encode_decode_roundtrip() {
        const BIG: u64 = 1 << 50;
        let mut edit = VersionEdit::new();
        for i in 0..4u64 {
            edit.add_file(
                3,
                FileMetaData::new(
                    BIG + 300 + i,
                    BIG + 400 + i,
                    InternalKey::new(b"foo", BIG + 500 + i, ValueType::Value),
                    InternalKey::new(b"zoo", BIG + 600 + i, ValueType::Deletion),
                ),
            );
            edit.remove_file(4, BIG + 700 + i);
            edit.set_compact_pointer(i as usize, InternalKey::new(b"x", BIG + 900 + i, ValueType::Value));
        }
        edit.set_comparator_name("foo");
        edit.set_log_number(BIG + 100);
        edit.set_next_file(BIG + 200);
        edit.set_last_sequence(BIG + 1000);

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
        assert_eq!(decoded.encode(), edit.encode());
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let mut encoded = VersionEdit::new().encode();
        put_varint32(&mut encoded, 8);
        assert!(VersionEdit::decode(&encoded).unwrap_err().is_corruption());
    }

    #[test]
    fn level_out_of_range_is_corruption() {
        let mut encoded = Vec::new();
        put_varint32(&mut encoded, tag::DELETED_FILE);
        put_varint32(&mut encoded, NUM_LEVELS as u32);
        put_varint64(&mut encoded, 1);
        assert!(VersionEdit::decode(&encoded).is_err());
    }
}
