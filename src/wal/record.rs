use crate::checksum;
use crate::coding::decode_fixed32;

/// Fragment type stored in each chunk header.
///
/// A record that fits in the current block is written as one `Full` chunk;
/// otherwise it becomes `First`, zero or more `Middle`, then `Last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Reserved for preallocated (zero-filled) file regions.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    pub const MAX: u8 = RecordType::Last as u8;

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}

/// One physical chunk header.
///
/// On-disk format:
/// ```text
/// ┌────────────────────┬────────────┬──────────┬───────────────┐
/// │ masked CRC32C (4B) │ Len (2B LE)│ Type(1B) │ Payload (Len) │
/// └────────────────────┴────────────┴──────────┴───────────────┘
/// ```
///
/// The CRC covers the type byte and the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub masked_crc: u32,
    pub length: u16,
    pub record_type: u8,
}

impl ChunkHeader {
    pub fn for_payload(record_type: RecordType, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        ChunkHeader {
            masked_crc: checksum::mask(chunk_crc(record_type as u8, payload)),
            length: payload.len() as u16,
            record_type: record_type as u8,
        }
    }

    pub fn encode(&self) -> [u8; super::HEADER_SIZE] {
        let mut out = [0u8; super::HEADER_SIZE];
        out[..4].copy_from_slice(&self.masked_crc.to_le_bytes());
        out[4..6].copy_from_slice(&self.length.to_le_bytes());
        out[6] = self.record_type;
        out
    }

    pub fn decode(data: &[u8]) -> Self {
        ChunkHeader {
            masked_crc: decode_fixed32(data),
            length: u16::from_le_bytes([data[4], data[5]]),
            record_type: data[6],
        }
    }

    /// Whether `payload` matches the stored checksum.
    pub fn verify(&self, payload: &[u8]) -> bool {
        checksum::unmask(self.masked_crc) == chunk_crc(self.record_type, payload)
    }
}

fn chunk_crc(record_type: u8, payload: &[u8]) -> u32 {
    checksum::extend(checksum::value(&[record_type]), payload)
}
