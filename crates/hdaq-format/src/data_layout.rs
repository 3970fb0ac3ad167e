//! HDF5 Data Layout message (type 0x0008), version 4 chunked storage
//! indexed by an extensible array.

use crate::bytes::{self, Reader};
use crate::error::FormatError;
use crate::extensible_array::EaParams;

const LAYOUT_CLASS_CHUNKED: u8 = 2;
const CHUNK_INDEX_EXTENSIBLE_ARRAY: u8 = 4;

/// Chunked layout with an extensible array chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedLayout {
    /// Chunk size per dataspace dimension.
    pub chunk_dims: Vec<u32>,
    /// Element size in bytes (stored as the trailing chunk dimension).
    pub element_size: u32,
    /// Index creation parameters.
    pub params: EaParams,
    /// Extensible array header address.
    pub index_address: Option<u64>,
}

impl ChunkedLayout {
    /// Serialize as a version 4 layout message.
    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(4); // version
        buf.push(LAYOUT_CLASS_CHUNKED);
        buf.push(0); // flags: no filters
        buf.push(self.chunk_dims.len() as u8 + 1);

        let widest = self
            .chunk_dims
            .iter()
            .copied()
            .chain(core::iter::once(self.element_size))
            .max()
            .unwrap_or(1);
        let dim_width = match widest {
            0..=0xFF => 1usize,
            0x100..=0xFFFF => 2,
            _ => 4,
        };
        buf.push(dim_width as u8);
        for &d in self.chunk_dims.iter().chain(core::iter::once(&self.element_size)) {
            bytes::put_uint(&mut buf, d as u64, dim_width);
        }

        buf.push(CHUNK_INDEX_EXTENSIBLE_ARRAY);
        // The layout message lists the super block pointer minimum before
        // the data block minimum; the array header uses the opposite order.
        buf.push(self.params.max_nelmts_bits);
        buf.push(self.params.idx_blk_elmts);
        buf.push(self.params.sup_blk_min_data_ptrs);
        buf.push(self.params.data_blk_min_elmts);
        buf.push(self.params.max_dblk_page_nelmts_bits);
        bytes::put_address(&mut buf, self.index_address, offset_size);
        buf
    }

    /// Parse a layout message, accepting only the chunked + extensible
    /// array form.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<ChunkedLayout, FormatError> {
        let mut r = Reader::new(data);
        let version = r.u8()?;
        if version != 4 {
            return Err(if matches!(version, 1..=3) {
                FormatError::UnsupportedLayout("layout message before version 4")
            } else {
                FormatError::InvalidLayoutVersion(version)
            });
        }
        match r.u8()? {
            LAYOUT_CLASS_CHUNKED => {}
            0 => return Err(FormatError::UnsupportedLayout("compact storage")),
            1 => return Err(FormatError::UnsupportedLayout("contiguous storage")),
            _ => return Err(FormatError::UnsupportedLayout("virtual storage")),
        }
        let flags = r.u8()?;
        if flags != 0 {
            return Err(FormatError::UnsupportedLayout("filtered chunks"));
        }
        let ndims = r.u8()? as usize;
        let dim_width = r.u8()? as usize;
        if ndims < 2 {
            return Err(FormatError::InvalidShape("chunk rank"));
        }
        let mut dims = (0..ndims)
            .map(|_| r.uint(dim_width).map(|v| v as u32))
            .collect::<Result<Vec<_>, _>>()?;
        let element_size = dims.pop().unwrap_or(0);

        if r.u8()? != CHUNK_INDEX_EXTENSIBLE_ARRAY {
            return Err(FormatError::UnsupportedLayout("chunk index other than extensible array"));
        }
        let max_nelmts_bits = r.u8()?;
        let idx_blk_elmts = r.u8()?;
        let sup_blk_min_data_ptrs = r.u8()?;
        let data_blk_min_elmts = r.u8()?;
        let max_dblk_page_nelmts_bits = r.u8()?;
        let index_address = r.address(offset_size)?;

        Ok(ChunkedLayout {
            chunk_dims: dims,
            element_size,
            params: EaParams {
                max_nelmts_bits,
                idx_blk_elmts,
                data_blk_min_elmts,
                sup_blk_min_data_ptrs,
                max_dblk_page_nelmts_bits,
            },
            index_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(chunk_dims: &[u32], element_size: u32) -> ChunkedLayout {
        ChunkedLayout {
            chunk_dims: chunk_dims.to_vec(),
            element_size,
            params: EaParams::default(),
            index_address: Some(0x400),
        }
    }

    #[test]
    fn encodes_parameters_in_layout_order() {
        let bytes = layout(&[3, 1], 8).serialize(8);
        assert_eq!(&bytes[..5], &[4, 2, 0, 3, 1]);
        assert_eq!(&bytes[5..8], &[3, 1, 8]);
        assert_eq!(&bytes[8..14], &[4, 32, 4, 4, 16, 10]);
        assert_eq!(&bytes[14..], &0x400u64.to_le_bytes());
    }

    #[test]
    fn roundtrip_wide_chunk() {
        let l = layout(&[70_000, 1], 4);
        let bytes = l.serialize(8);
        assert_eq!(bytes[4], 4);
        assert_eq!(ChunkedLayout::parse(&bytes, 8).unwrap(), l);
    }

    #[test]
    fn undefined_index_address() {
        let mut l = layout(&[10, 1], 2);
        l.index_address = None;
        let parsed = ChunkedLayout::parse(&l.serialize(8), 8).unwrap();
        assert_eq!(parsed.index_address, None);
    }

    #[test]
    fn contiguous_rejected() {
        let mut msg = vec![4, 1];
        msg.extend_from_slice(&0u64.to_le_bytes());
        msg.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(
            ChunkedLayout::parse(&msg, 8),
            Err(FormatError::UnsupportedLayout("contiguous storage"))
        );
    }

    #[test]
    fn other_index_types_rejected() {
        let mut bytes = layout(&[4, 1], 8).serialize(8);
        bytes[8] = 3; // fixed array
        assert!(matches!(
            ChunkedLayout::parse(&bytes, 8),
            Err(FormatError::UnsupportedLayout(_))
        ));
    }
}
