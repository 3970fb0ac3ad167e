//! HDF5 Link message (type 0x0006) and Link Info message (type 0x0002)
//! for groups with compact link storage.

use crate::bytes::{self, Reader};
use crate::error::FormatError;

/// Link type code of a hard link.
const LINK_TYPE_HARD: u8 = 0;

/// A hard link from a group to an object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    /// Name of this link within its group.
    pub name: String,
    /// Object header address of the target.
    pub address: u64,
}

impl LinkMessage {
    pub fn hard(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// Serialize as a version 1 hard link with an ASCII name.
    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let name = self.name.as_bytes();
        let width = length_width(name.len());
        let mut buf = Vec::with_capacity(2 + width + name.len() + offset_size as usize);
        buf.push(1); // version
        // bits 0-1: size of the name length field; no optional fields
        buf.push(match width {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        });
        bytes::put_uint(&mut buf, name.len() as u64, width);
        buf.extend_from_slice(name);
        bytes::put_uint(&mut buf, self.address, offset_size as usize);
        buf
    }

    /// Parse a link message. Only hard links are accepted.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkMessage, FormatError> {
        let mut r = Reader::new(data);
        let version = r.u8()?;
        if version != 1 {
            return Err(FormatError::InvalidLinkVersion(version));
        }
        let flags = r.u8()?;
        let link_type = if flags & 0x08 != 0 {
            r.u8()?
        } else {
            LINK_TYPE_HARD
        };
        if flags & 0x04 != 0 {
            r.skip(8)?; // creation order
        }
        if flags & 0x10 != 0 {
            r.skip(1)?; // character set
        }
        let name_len = r.uint(1 << (flags & 0x03))? as usize;
        let name = String::from_utf8_lossy(r.bytes(name_len)?).into_owned();

        if link_type != LINK_TYPE_HARD {
            return Err(FormatError::UnsupportedLink(link_type));
        }
        let address = r.uint(offset_size as usize)?;
        Ok(LinkMessage { name, address })
    }
}

fn length_width(len: usize) -> usize {
    match len {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 4,
    }
}

/// Link Info message for compact storage: no creation order, no dense
/// link heap.
pub fn serialize_link_info(offset_size: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + 2 * offset_size as usize);
    buf.push(0); // version
    buf.push(0); // flags
    bytes::put_address(&mut buf, None, offset_size); // fractal heap
    bytes::put_address(&mut buf, None, offset_size); // name index b-tree
    buf
}

/// Check a Link Info message and fail unless links are stored compactly
/// in the object header.
pub fn check_link_info(data: &[u8], offset_size: u8) -> Result<(), FormatError> {
    let mut r = Reader::new(data);
    let version = r.u8()?;
    if version != 0 {
        return Err(FormatError::InvalidLinkVersion(version));
    }
    let flags = r.u8()?;
    if flags & 0x01 != 0 {
        r.skip(8)?; // max creation order
    }
    if r.address(offset_size)?.is_some() {
        return Err(FormatError::UnsupportedGroupStorage);
    }
    Ok(())
}

/// Group Info message with default link phase change values.
pub fn serialize_group_info() -> Vec<u8> {
    vec![0, 0]
}
