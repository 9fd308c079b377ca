//! Block compression codecs, looked up by the id persisted in each block
//! trailer.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{Error, Result};

/// A compression algorithm. Registered under a persistent id; the id, not
/// the name, is what gets written to disk.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;
    fn compress(&self, src: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, src: &[u8]) -> Result<Vec<u8>>;
}

/// Id 0 is reserved for uncompressed blocks.
pub const NO_COMPRESSION_ID: u8 = 0;
pub const LZ4_ID: u8 = 1;
pub const ZLIB_ID: u8 = 2;

/// Which codec new blocks are written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
    Zlib,
    /// A codec registered by the application under this id.
    Custom(u8),
}

impl CompressionType {
    pub fn id(self) -> u8 {
        match self {
            CompressionType::None => NO_COMPRESSION_ID,
            CompressionType::Lz4 => LZ4_ID,
            CompressionType::Zlib => ZLIB_ID,
            CompressionType::Custom(id) => id,
        }
    }
}

pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &str {
        "lz4"
    }

    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(src))
    }

    fn decompress(&self, src: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(src)
            .map_err(|e| Error::corruption(format!("lz4: {e}")))
    }
}

pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn name(&self) -> &str {
        "zlib"
    }

    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(src)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, src: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ZlibDecoder::new(src)
            .read_to_end(&mut out)
            .map_err(|e| Error::corruption(format!("zlib: {e}")))?;
        Ok(out)
    }
}

/// Id → codec table. The default registry knows lz4 and zlib.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<u8, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// A registry with no codecs; only uncompressed blocks are readable.
    pub fn empty() -> Self {
        CodecRegistry {
            codecs: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: u8, codec: Arc<dyn Codec>) -> Result<()> {
        if id == NO_COMPRESSION_ID {
            return Err(Error::invalid_argument("codec id 0 is reserved"));
        }
        self.codecs.insert(id, codec);
        Ok(())
    }

    pub fn get(&self, id: u8) -> Result<&Arc<dyn Codec>> {
        self.codecs.get(&id).ok_or(Error::UnknownCompression(id))
    }

    pub fn contains(&self, id: u8) -> bool {
        id == NO_COMPRESSION_ID || self.codecs.contains_key(&id)
    }

    pub fn compress<'a>(&self, id: u8, src: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if id == NO_COMPRESSION_ID {
            return Ok(Cow::Borrowed(src));
        }
        Ok(Cow::Owned(self.get(id)?.compress(src)?))
    }

    pub fn decompress<'a>(&self, id: u8, src: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if id == NO_COMPRESSION_ID {
            return Ok(Cow::Borrowed(src));
        }
        Ok(Cow::Owned(self.get(id)?.decompress(src)?))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut codecs: HashMap<u8, Arc<dyn Codec>> = HashMap::new();
        codecs.insert(LZ4_ID, Arc::new(Lz4Codec));
        codecs.insert(ZLIB_ID, Arc::new(ZlibCodec));
        CodecRegistry { codecs }
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.codecs.iter().map(|(id, c)| (*id, c.name().to_string())).collect();
        ids.sort();
        f.debug_struct("CodecRegistry").field("codecs", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_codecs_roundtrip() {
        let registry = CodecRegistry::default();
        let data = b"hello hello hello hello hello hello hello".repeat(20);
        for id in [NO_COMPRESSION_ID, LZ4_ID, ZLIB_ID] {
            let compressed = registry.compress(id, &data).unwrap();
            if id != NO_COMPRESSION_ID {
                assert!(compressed.len() < data.len());
            }
            let restored = registry.decompress(id, &compressed).unwrap();
            assert_eq!(restored.as_ref(), data.as_slice());
        }
    }

    #[test]
    fn unknown_id_is_an_error() {
        let registry = CodecRegistry::default();
        assert!(matches!(
            registry.decompress(42, b"raw"),
            Err(Error::UnknownCompression(42))
        ));
        assert!(registry.clone().register(0, Arc::new(Lz4Codec)).is_err());
    }

    #[test]
    fn corrupt_payload_is_corruption() {
        let registry = CodecRegistry::default();
        assert!(registry.decompress(LZ4_ID, &[0xff, 0xff, 0xff, 0x7f, 1]).unwrap_err().is_corruption());
    }
}
