//! Fixed-width and variable-length integer encoding.
//!
//! Varints store 7 bits per byte, least significant group first; the high bit
//! of each byte says whether another byte follows. A u32 takes at most 5
//! bytes, a u64 at most 10.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

pub const MAX_VARINT32_LEN: usize = 5;
pub const MAX_VARINT64_LEN: usize = 10;

pub fn put_fixed32(dst: &mut Vec<u8>, v: u32) {
    dst.put_u32_le(v);
}

pub fn put_fixed64(dst: &mut Vec<u8>, v: u64) {
    dst.put_u64_le(v);
}

pub fn decode_fixed32(src: &[u8]) -> u32 {
    let mut buf = &src[..4];
    buf.get_u32_le()
}

pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = &src[..8];
    buf.get_u64_le()
}

pub fn put_varint32(dst: &mut Vec<u8>, v: u32) {
    put_varint64(dst, v as u64);
}

pub fn put_varint64(dst: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        dst.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    dst.put_u8(v as u8);
}

/// Number of bytes `put_varint64` emits for `v`.
pub fn varint_length(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Appends `value` prefixed with its varint32 length.
pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.put_slice(value);
}

/// Decodes a varint32 from the front of `src`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint32(src: &[u8]) -> Result<(u32, usize)> {
    let (v, n) = decode_varint(src, MAX_VARINT32_LEN)?;
    if v > u32::MAX as u64 {
        return Err(Error::corruption("varint32 overflow"));
    }
    Ok((v as u32, n))
}

pub fn decode_varint64(src: &[u8]) -> Result<(u64, usize)> {
    decode_varint(src, MAX_VARINT64_LEN)
}

fn decode_varint(src: &[u8], max_len: usize) -> Result<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in src.iter().take(max_len).enumerate() {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(Error::corruption("truncated or overlong varint"))
}

/// Cursor-style readers that advance a `&[u8]` past what they decode.
pub trait SliceReader {
    fn read_varint32(&mut self) -> Result<u32>;
    fn read_varint64(&mut self) -> Result<u64>;
    fn read_length_prefixed(&mut self) -> Result<Self>
    where
        Self: Sized;
}

impl<'a> SliceReader for &'a [u8] {
    fn read_varint32(&mut self) -> Result<u32> {
        let (v, n) = decode_varint32(self)?;
        self.advance(n);
        Ok(v)
    }

    fn read_varint64(&mut self) -> Result<u64> {
        let (v, n) = decode_varint64(self)?;
        self.advance(n);
        Ok(v)
    }

    fn read_length_prefixed(&mut self) -> Result<Self> {
        let len = self.read_varint32()? as usize;
        if self.len() < len {
            return Err(Error::corruption("length-prefixed slice truncated"));
        }
        let whole: &'a [u8] = *self;
        let (head, tail) = whole.split_at(len);
        *self = tail;
        Ok(head)
    }
}
