//! HDF5 file signature and version 2/3 superblock.

use crate::bytes::{self, Reader};
use crate::error::FormatError;

/// The 8-byte HDF5 magic signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Encoded size of a v2/v3 superblock with 8-byte offsets and lengths.
pub const SUPERBLOCK_SIZE: usize = 48;

/// Search for the HDF5 signature at offset 0, 512, 1024, 2048, ...
///
/// Returns the byte offset where the signature was found.
pub fn find_signature(data: &[u8]) -> Result<usize, FormatError> {
    let mut offset = 0usize;
    while offset + HDF5_SIGNATURE.len() <= data.len() {
        if data[offset..offset + HDF5_SIGNATURE.len()] == HDF5_SIGNATURE {
            return Ok(offset);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Err(FormatError::SignatureNotFound)
}

/// Version 2/3 superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (2 or 3).
    pub version: u8,
    /// Size of offsets in bytes (2, 4, or 8).
    pub offset_size: u8,
    /// Size of lengths in bytes (2, 4, or 8).
    pub length_size: u8,
    /// File consistency flags.
    pub consistency_flags: u8,
    /// File base address.
    pub base_address: u64,
    /// Superblock extension address, if any.
    pub extension_address: Option<u64>,
    /// End-of-file address.
    pub eof_address: u64,
    /// Root group object header address.
    pub root_group_address: u64,
}

impl Superblock {
    /// A version 3 superblock with 8-byte offsets and lengths.
    pub fn v3(eof_address: u64, root_group_address: u64) -> Self {
        Self {
            version: 3,
            offset_size: 8,
            length_size: 8,
            consistency_flags: 0,
            base_address: 0,
            extension_address: None,
            eof_address,
            root_group_address,
        }
    }

    /// Parse a superblock whose signature starts at `signature_offset`,
    /// verifying its checksum.
    pub fn parse(data: &[u8], signature_offset: usize) -> Result<Superblock, FormatError> {
        let mut r = Reader::at(data, signature_offset)?;
        if r.bytes(HDF5_SIGNATURE.len())? != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }
        let version = r.u8()?;
        if !matches!(version, 2 | 3) {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let offset_size = r.u8()?;
        let length_size = r.u8()?;
        if !matches!(offset_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        if !matches!(length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        let consistency_flags = r.u8()?;
        let os = offset_size as usize;
        let base_address = r.uint(os)?;
        let extension_address = r.address(offset_size)?;
        let eof_address = r.uint(os)?;
        let root_group_address = r.uint(os)?;
        r.skip(4)?;
        bytes::verify_checksum(&data[signature_offset..r.position()])?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            consistency_flags,
            base_address,
            extension_address,
            eof_address,
            root_group_address,
        })
    }

    /// Serialize with a trailing lookup3 checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let os = self.offset_size as usize;
        let mut buf = Vec::with_capacity(12 + 4 * os + 4);
        buf.extend_from_slice(&HDF5_SIGNATURE);
        buf.push(self.version);
        buf.push(self.offset_size);
        buf.push(self.length_size);
        buf.push(self.consistency_flags);
        bytes::put_uint(&mut buf, self.base_address, os);
        bytes::put_address(&mut buf, self.extension_address, self.offset_size);
        bytes::put_uint(&mut buf, self.eof_address, os);
        bytes::put_uint(&mut buf, self.root_group_address, os);
        bytes::seal(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_serializes_to_48_bytes() {
        let bytes = Superblock::v3(4096, 48).serialize();
        assert_eq!(bytes.len(), SUPERBLOCK_SIZE);
        assert_eq!(&bytes[..8], &HDF5_SIGNATURE);
        assert_eq!(bytes[8], 3);
    }

    #[test]
    fn roundtrip_v3() {
        let sb = Superblock::v3(2048, 48);
        let parsed = Superblock::parse(&sb.serialize(), 0).unwrap();
        assert_eq!(parsed, sb);
        assert_eq!(parsed.extension_address, None);
    }

    #[test]
    fn parse_at_nonzero_offset() {
        let mut data = vec![0u8; 512];
        data.extend_from_slice(&Superblock::v3(1024, 560).serialize());
        assert_eq!(find_signature(&data), Ok(512));
        let sb = Superblock::parse(&data, 512).unwrap();
        assert_eq!(sb.root_group_address, 560);
    }

    #[test]
    fn corrupted_checksum() {
        let mut data = Superblock::v3(2048, 48).serialize();
        data[20] ^= 0xFF;
        assert!(matches!(
            Superblock::parse(&data, 0),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn old_versions_rejected() {
        let mut data = Superblock::v3(2048, 48).serialize();
        data[8] = 0;
        assert_eq!(
            Superblock::parse(&data, 0),
            Err(FormatError::UnsupportedVersion(0))
        );
    }

    #[test]
    fn signature_not_found() {
        assert_eq!(find_signature(&[0u8; 4096]), Err(FormatError::SignatureNotFound));
        assert_eq!(find_signature(&[]), Err(FormatError::SignatureNotFound));
    }

    #[test]
    fn signature_at_non_power_of_two_ignored() {
        let mut data = vec![0u8; 1024];
        data[100..108].copy_from_slice(&HDF5_SIGNATURE);
        assert_eq!(find_signature(&data), Err(FormatError::SignatureNotFound));
    }

    #[test]
    fn truncated() {
        let data = HDF5_SIGNATURE.to_vec();
        assert!(matches!(
            Superblock::parse(&data, 0),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
