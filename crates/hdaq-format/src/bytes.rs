//! Little-endian cursor helpers shared by the message codecs.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Address value meaning "not allocated" (all bits set).
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Bounds-checked little-endian reader over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reader positioned at `pos` inside `data`.
    pub fn at(data: &'a [u8], pos: usize) -> Result<Self, FormatError> {
        if pos > data.len() {
            return Err(FormatError::UnexpectedEof {
                expected: pos,
                available: data.len(),
            });
        }
        Ok(Self { data, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(n).ok_or(FormatError::UnexpectedEof {
            expected: usize::MAX,
            available: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(FormatError::UnexpectedEof {
                expected: end,
                available: self.data.len(),
            });
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    /// Read an unsigned integer stored in `size` bytes (1 to 8).
    pub fn uint(&mut self, size: usize) -> Result<u64, FormatError> {
        if size == 0 || size > 8 {
            return Err(FormatError::InvalidOffsetSize(size as u8));
        }
        Ok(LittleEndian::read_uint(self.bytes(size)?, size))
    }

    /// Read a file address; an all-ones value maps to `None`.
    pub fn address(&mut self, offset_size: u8) -> Result<Option<u64>, FormatError> {
        let size = offset_size as usize;
        let raw = self.bytes(size)?;
        if raw.iter().all(|&b| b == 0xFF) {
            return Ok(None);
        }
        Ok(Some(LittleEndian::read_uint(raw, size)))
    }

    /// Consume a four-byte block signature.
    pub fn signature(&mut self, expected: &'static str) -> Result<(), FormatError> {
        if self.bytes(4)? != expected.as_bytes() {
            return Err(FormatError::InvalidSignature { expected });
        }
        Ok(())
    }
}

/// Append `value` using the low `size` bytes, little-endian.
pub fn put_uint(buf: &mut Vec<u8>, value: u64, size: usize) {
    buf.extend_from_slice(&value.to_le_bytes()[..size]);
}

/// Append a file address; `None` writes the undefined address.
pub fn put_address(buf: &mut Vec<u8>, address: Option<u64>, offset_size: u8) {
    put_uint(buf, address.unwrap_or(UNDEFINED_ADDRESS), offset_size as usize);
}

/// Check the trailing four-byte checksum of `block` (covering everything
/// before it).
pub fn verify_checksum(block: &[u8]) -> Result<(), FormatError> {
    if block.len() < 4 {
        return Err(FormatError::UnexpectedEof {
            expected: 4,
            available: block.len(),
        });
    }
    let (body, tail) = block.split_at(block.len() - 4);
    let expected = LittleEndian::read_u32(tail);
    let computed = crate::checksum::jenkins_lookup3(body);
    if expected != computed {
        return Err(FormatError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Append the lookup3 checksum of everything in `buf`.
pub fn seal(buf: &mut Vec<u8>) {
    let checksum = crate::checksum::jenkins_lookup3(buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
}
