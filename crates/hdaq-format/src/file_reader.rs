//! HDF5 file loading (read pipeline).
//!
//! Rebuilds a [`FileImage`] from the subset of HDF5 that
//! [`FileImage::to_bytes`] writes: v2/v3 superblocks, v2 object headers,
//! compact link storage, compact attributes and chunked datasets indexed
//! by an extensible array. Anything else is reported as unsupported rather
//! than skipped, so that writing the image back never silently drops data.

use std::collections::{BTreeMap, HashSet};

use crate::attribute::AttributeMessage;
use crate::bytes::Reader;
use crate::data_layout::ChunkedLayout;
use crate::dataspace::{Dataspace, DataspaceType};
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::extensible_array;
use crate::file_image::{Dataset, FileImage, Group, Node};
use crate::file_layout::{DatasetLayout, FileLayout};
use crate::file_writer;
use crate::link_message::{self, LinkMessage};
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::superblock::{self, Superblock, SUPERBLOCK_SIZE};

struct Loader<'a> {
    /// File contents starting at the base address.
    data: &'a [u8],
    offset_size: u8,
    length_size: u8,
    visited: HashSet<u64>,
    /// Placement of every dataset whose header is byte-identical to what
    /// the writer produces; `None` once one is not.
    layouts: Option<BTreeMap<String, DatasetLayout>>,
}

impl<'a> Loader<'a> {
    fn header(&mut self, address: u64) -> Result<ObjectHeader, FormatError> {
        if !self.visited.insert(address) {
            return Err(FormatError::DuplicateObject(address));
        }
        ObjectHeader::parse(self.data, address as usize, self.offset_size, self.length_size)
    }

    fn attributes(&self, header: &ObjectHeader) -> Result<Vec<AttributeMessage>, FormatError> {
        if let Some(info) = header.find(MessageType::AttributeInfo) {
            check_attribute_info(info, self.offset_size)?;
        }
        header
            .find_all(MessageType::Attribute)
            .map(|raw| AttributeMessage::parse(raw, self.length_size))
            .collect()
    }

    fn group(&mut self, header: &ObjectHeader, path: &str) -> Result<Group, FormatError> {
        if header.find(MessageType::SymbolTable).is_some() {
            return Err(FormatError::UnsupportedGroupStorage);
        }
        if let Some(info) = header.find(MessageType::LinkInfo) {
            link_message::check_link_info(info, self.offset_size)?;
        }
        let mut children = BTreeMap::new();
        for raw in header.find_all(MessageType::Link) {
            let link = LinkMessage::parse(raw, self.offset_size)?;
            let child = self.header(link.address)?;
            let child_path = format!("{path}/{}", link.name);
            let node = if child.find(MessageType::DataLayout).is_some() {
                Node::Dataset(self.dataset(&child, link.address, child_path)?)
            } else if child.find(MessageType::LinkInfo).is_some()
                || child.find(MessageType::SymbolTable).is_some()
            {
                Node::Group(self.group(&child, &child_path)?)
            } else {
                return Err(FormatError::UnsupportedLayout("object that is neither a group nor a dataset"));
            };
            children.insert(link.name, node);
        }
        Ok(Group {
            children,
            attributes: self.attributes(header)?,
        })
    }

    fn dataset(&mut self, header: &ObjectHeader, address: u64, path: String) -> Result<Dataset, FormatError> {
        if header.find(MessageType::FilterPipeline).is_some() {
            return Err(FormatError::UnsupportedLayout("filtered chunks"));
        }
        let (datatype, _) = Datatype::parse(required(header, MessageType::Datatype)?)?;
        let space = Dataspace::parse(required(header, MessageType::Dataspace)?, self.length_size)?;
        if space.space_type != DataspaceType::Simple {
            return Err(FormatError::InvalidShape("scalar or null dataspace"));
        }
        let layout = ChunkedLayout::parse(required(header, MessageType::DataLayout)?, self.offset_size)?;
        if layout.element_size != datatype.type_size() {
            return Err(FormatError::InvalidShape("chunk element size differs from datatype"));
        }
        let chunk_dims: Vec<u64> = layout.chunk_dims.iter().map(|&c| u64::from(c)).collect();

        let mut ds = Dataset::new(
            datatype,
            &space.dimensions,
            &space.max_dims(),
            &chunk_dims,
            layout.params,
        )?;
        let mut chunks = BTreeMap::new();
        let mut index = None;
        if let Some(index_address) = layout.index_address {
            let chunk_len = ds.chunk_len();
            let (addresses, array) =
                extensible_array::read_with_layout(self.data, index_address, self.offset_size, self.length_size)?;
            for (position, address) in addresses.into_iter().enumerate() {
                let Some(address) = address else { continue };
                let mut r = Reader::at(self.data, address as usize)?;
                let chunk = r.bytes(chunk_len)?.to_vec();
                let scaled = ds.scaled_from_index(position as u64);
                ds.chunks.insert(scaled, chunk);
                chunks.insert(position as u64, address);
            }
            index = Some(array);
        }
        ds.attributes = self.attributes(header)?;

        if self.layouts.is_some() {
            let expected = file_writer::dataset_header(&ds, layout.index_address)?;
            let stored = self.data.get(address as usize..).and_then(|d| d.get(..expected.len()));
            if stored != Some(expected.as_slice()) {
                self.layouts = None;
            } else if let Some(layouts) = self.layouts.as_mut() {
                layouts.insert(
                    path,
                    DatasetLayout {
                        header_address: address,
                        header_len: expected.len(),
                        dims: ds.dims.clone(),
                        chunks,
                        index,
                    },
                );
            }
        }
        Ok(ds)
    }
}

fn required(header: &ObjectHeader, msg_type: MessageType) -> Result<&[u8], FormatError> {
    header
        .find(msg_type)
        .ok_or(FormatError::UnsupportedLayout("dataset header without datatype, dataspace or layout"))
}

/// Fail unless attributes are stored compactly in the object header.
fn check_attribute_info(data: &[u8], offset_size: u8) -> Result<(), FormatError> {
    let mut r = Reader::new(data);
    let _version = r.u8()?;
    let flags = r.u8()?;
    if flags & 0x01 != 0 {
        r.skip(2)?; // max creation index
    }
    if r.address(offset_size)?.is_some() {
        return Err(FormatError::UnsupportedLayout("dense attribute storage"));
    }
    Ok(())
}

impl FileImage {
    /// Load an image from HDF5 file bytes.
    pub fn from_bytes(data: &[u8]) -> Result<FileImage, FormatError> {
        FileImage::from_bytes_with_layout(data).map(|(image, _)| image)
    }

    /// Load an image, also returning where its datasets live when the file
    /// has exactly the shape [`FileImage::to_bytes`] produces, so that
    /// appends can be written in place.
    pub fn from_bytes_with_layout(data: &[u8]) -> Result<(FileImage, Option<FileLayout>), FormatError> {
        let signature_offset = superblock::find_signature(data)?;
        let sb = Superblock::parse(data, signature_offset)?;
        let base = sb.base_address as usize;
        if base > data.len() {
            return Err(FormatError::UnexpectedEof {
                expected: base,
                available: data.len(),
            });
        }
        let own_superblock = signature_offset == 0
            && data.get(..SUPERBLOCK_SIZE)
                == Some(Superblock::v3(sb.eof_address, sb.root_group_address).serialize().as_slice());
        let mut loader = Loader {
            data: &data[base..],
            offset_size: sb.offset_size,
            length_size: sb.length_size,
            visited: HashSet::new(),
            layouts: own_superblock.then(BTreeMap::new),
        };
        let root = loader.header(sb.root_group_address)?;
        let image = FileImage {
            root: loader.group(&root, "")?,
        };
        let layout = loader.layouts.map(|datasets| FileLayout {
            root_address: sb.root_group_address,
            eof: sb.eof_address.max(data.len() as u64),
            datasets,
        });
        Ok((image, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::UNLIMITED;
    use crate::object_header::ObjectHeaderWriter;
    use crate::selection::Selection;

    fn f64_bytes(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn sample_image() -> FileImage {
        let mut image = FileImage::new();
        image.create_group_all("/acq/raw").unwrap();
        image
            .create_dataset("/acq/raw/temp", Datatype::float64(), &[3, 1], &[3, UNLIMITED], &[3, 1])
            .unwrap();
        let ds = image.dataset_mut("/acq/raw/temp").unwrap();
        ds.write_selection(&Selection::hyperslab(&[0, 0], &[3, 1]), &f64_bytes(&[0.0, 0.25, 1.0]))
            .unwrap();
        ds.set_extent(&[3, 2]).unwrap();
        ds.write_selection(&Selection::hyperslab(&[0, 1], &[3, 1]), &f64_bytes(&[0.1, 0.35, 1.1]))
            .unwrap();
        image
            .create_attribute(
                "/acq/raw/temp",
                AttributeMessage::new("units", Datatype::integer(1, false), vec![b'K']),
            )
            .unwrap();
        image
    }

    #[test]
    fn roundtrip_preserves_tree() {
        let image = sample_image();
        let loaded = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
        assert_eq!(loaded, image);
        let ds = loaded.dataset("/acq/raw/temp").unwrap();
        assert_eq!(ds.dims(), &[3, 2]);
        assert_eq!(
            ds.read_selection(&Selection::hyperslab(&[0, 1], &[3, 1])).unwrap(),
            f64_bytes(&[0.1, 0.35, 1.1])
        );
    }

    #[test]
    fn many_units_roundtrip() {
        // 4 inline, 240 in index block data blocks, the rest in super blocks
        let mut image = FileImage::new();
        image
            .create_dataset("/d", Datatype::integer(4, true), &[2, 1], &[2, UNLIMITED], &[2, 1])
            .unwrap();
        let ds = image.dataset_mut("/d").unwrap();
        for k in 0..400u64 {
            ds.set_extent(&[2, k + 1]).unwrap();
            let unit: Vec<u8> = [k as i32, -(k as i32)].iter().flat_map(|v| v.to_le_bytes()).collect();
            ds.write_selection(&Selection::hyperslab(&[0, k], &[2, 1]), &unit).unwrap();
        }
        let loaded = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
        let ds = loaded.dataset("/d").unwrap();
        assert_eq!(ds.chunk_count(), 400);
        let unit = ds.read_selection(&Selection::hyperslab(&[0, 321], &[2, 1])).unwrap();
        assert_eq!(&unit[..4], &321i32.to_le_bytes());
        assert_eq!(&unit[4..], &(-321i32).to_le_bytes());
    }

    #[test]
    fn sparse_chunks_stay_missing() {
        let mut image = FileImage::new();
        image
            .create_dataset("/d", Datatype::float32(), &[1, 6], &[1, UNLIMITED], &[1, 1])
            .unwrap();
        image
            .dataset_mut("/d")
            .unwrap()
            .write_selection(&Selection::hyperslab(&[0, 4], &[1, 1]), &2.5f32.to_le_bytes())
            .unwrap();
        let loaded = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
        assert_eq!(loaded.dataset("/d").unwrap().chunk_count(), 1);
        assert_eq!(loaded, image);
    }

    #[test]
    fn signature_after_user_block() {
        let image = sample_image();
        let mut bytes = vec![0u8; 512];
        let mut file = image.to_bytes().unwrap();
        // addresses are relative to the base address
        file[8 + 4..8 + 4 + 8].copy_from_slice(&512u64.to_le_bytes());
        let len = 44;
        let checksum = crate::checksum::jenkins_lookup3(&file[..len]);
        file[len..len + 4].copy_from_slice(&checksum.to_le_bytes());
        bytes.extend_from_slice(&file);
        assert_eq!(FileImage::from_bytes(&bytes).unwrap(), image);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            FileImage::from_bytes(b"not an hdf5 file at all"),
            Err(FormatError::SignatureNotFound)
        );
    }

    #[test]
    fn corrupted_chunk_index_detected() {
        let image = sample_image();
        let mut bytes = image.to_bytes().unwrap();
        let pos = bytes.windows(4).position(|w| w == b"EAHD").unwrap();
        bytes[pos + 8] ^= 0xFF;
        assert!(matches!(
            FileImage::from_bytes(&bytes),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn cyclic_links_rejected() {
        // root header linking to itself
        let mut w = ObjectHeaderWriter::new();
        w.add_message(MessageType::LinkInfo, link_message::serialize_link_info(8)).unwrap();
        w.add_message(MessageType::Link, LinkMessage::hard("self", 48).serialize(8)).unwrap();
        let header = w.serialize();
        let mut bytes = Superblock::v3(48 + header.len() as u64, 48).serialize();
        bytes.extend_from_slice(&header);
        assert_eq!(
            FileImage::from_bytes(&bytes),
            Err(FormatError::DuplicateObject(48))
        );
    }
}
