use std::fmt;

use crate::coding::{decode_fixed64, put_fixed64};
use crate::error::{Error, Result};

/// Monotonically increasing write counter. Only the low 56 bits are usable;
/// the remaining byte of the packed tag holds the [`ValueType`].
pub type SequenceNumber = u64;

pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    /// A delete (tombstone marker).
    Deletion = 0x00,
    /// A normal put operation.
    Value = 0x01,
}

/// The type that sorts first among entries sharing a sequence number; used
/// when building seek targets.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl TryFrom<u8> for ValueType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(ValueType::Deletion),
            0x01 => Ok(ValueType::Value),
            _ => Err(Error::corruption(format!("invalid value type: {byte}"))),
        }
    }
}

pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    (sequence << 8) | value_type as u64
}

/// User key portion of an encoded internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC, type DESC), implemented by
/// [`crate::comparator::InternalKeyComparator`] over the encoded form.
/// This ensures the newest version of a key always comes first during merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(internal_key: &'a [u8]) -> Result<Self> {
        if internal_key.len() < 8 {
            return Err(Error::corruption("internal key too short"));
        }
        let tag = decode_fixed64(&internal_key[internal_key.len() - 8..]);
        Ok(ParsedInternalKey {
            user_key: extract_user_key(internal_key),
            sequence: tag >> 8,
            value_type: ValueType::try_from((tag & 0xff) as u8)?,
        })
    }
}

impl fmt::Display for ParsedInternalKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' @ {} : {:?}",
            String::from_utf8_lossy(self.user_key),
            self.sequence,
            self.value_type
        )
    }
}

/// Owned, encoded internal key: `user_key ++ fixed64((sequence << 8) | type)`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        rep.extend_from_slice(user_key);
        put_fixed64(&mut rep, pack_sequence_and_type(sequence, value_type));
        InternalKey { rep }
    }

    /// Wraps already-encoded bytes. Does not validate.
    pub fn decode_from(encoded: &[u8]) -> Self {
        InternalKey { rep: encoded.to_vec() }
    }

    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }

    pub fn clear(&mut self) {
        self.rep.clear();
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match ParsedInternalKey::parse(&self.rep) {
            Ok(parsed) => write!(f, "{parsed}"),
            Err(_) => write!(f, "(bad){:?}", self.rep),
        }
    }
}

/// Key used to probe a memtable or table for the newest version of
/// `user_key` visible at `sequence`.
pub struct LookupKey {
    key: InternalKey,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        LookupKey {
            key: InternalKey::new(user_key, sequence, VALUE_TYPE_FOR_SEEK),
        }
    }

    pub fn internal_key(&self) -> &[u8] {
        self.key.encode()
    }

    pub fn user_key(&self) -> &[u8] {
        self.key.user_key()
    }
}
