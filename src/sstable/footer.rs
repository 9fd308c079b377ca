use crate::coding::{decode_fixed64, put_fixed64, put_varint64, SliceReader};
use crate::error::{Error, Result};

/// Magic number closing every table file.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Every block is followed by a 1-byte compression id and a 4-byte masked
/// CRC32C of the contents plus that id.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block inside a table file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Two varint64s.
    pub const MAX_ENCODED_LENGTH: usize = 10 + 10;

    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode from the front of `input`, advancing it.
    pub fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let offset = input
            .read_varint64()
            .map_err(|_| Error::corruption("bad block handle"))?;
        let size = input
            .read_varint64()
            .map_err(|_| Error::corruption("bad block handle"))?;
        Ok(BlockHandle { offset, size })
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        Self::decode_from(&mut data)
    }
}

/// The footer sits at the end of the table file.
/// It tells the reader where to find the index and metaindex blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Metaindex handle (varints)           │
/// │ Index handle (varints)               │
/// │ Zero padding up to 40 bytes          │
/// │ Magic number (8B LE)                 │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        put_fixed64(&mut buf, TABLE_MAGIC);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_LENGTH {
            return Err(Error::corruption("footer too short"));
        }
        let data = &data[data.len() - Self::ENCODED_LENGTH..];
        let magic = decode_fixed64(&data[Self::ENCODED_LENGTH - 8..]);
        if magic != TABLE_MAGIC {
            return Err(Error::corruption(format!(
                "not an sstable (bad magic number {magic:#x})"
            )));
        }
        let mut input = &data[..Self::ENCODED_LENGTH - 8];
        let metaindex_handle = BlockHandle::decode_from(&mut input)?;
        let index_handle = BlockHandle::decode_from(&mut input)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}
