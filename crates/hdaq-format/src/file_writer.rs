//! HDF5 file creation (write pipeline).
//!
//! Produces files with a v3 superblock, v2 object headers, compact link
//! storage, and chunked datasets indexed by extensible arrays. The file is
//! laid out as:
//!
//! ```text
//! superblock | object headers (pre-order) | per dataset: chunks, index
//! ```

use std::collections::BTreeMap;

use crate::data_layout::ChunkedLayout;
use crate::dataspace::Dataspace;
use crate::error::FormatError;
use crate::extensible_array::{self, ArrayLayout};
use crate::file_image::{Dataset, FileImage, Group, Node};
use crate::file_layout::{DatasetLayout, FileLayout};
use crate::link_message::{self, LinkMessage};
use crate::message_type::MessageType;
use crate::object_header::{ObjectHeaderWriter, MSG_FLAG_CONSTANT};
use crate::superblock::{Superblock, SUPERBLOCK_SIZE};

pub(crate) const OFFSET_SIZE: u8 = 8;
pub(crate) const LENGTH_SIZE: u8 = 8;

/// Fill value message v3: allocation time late, write time "if set",
/// no fill value defined (reads as zero).
const FILL_VALUE_MESSAGE: [u8; 2] = [3, 0x0a];

enum Object<'a> {
    Group(&'a Group),
    Dataset(&'a Dataset),
}

struct FlatObject<'a> {
    path: String,
    object: Object<'a>,
    /// Link name and index of the linked object.
    links: Vec<(&'a str, usize)>,
}

/// Append `group` (at `path`) and everything below it in pre-order;
/// returns the group's index.
fn flatten<'a>(group: &'a Group, path: String, out: &mut Vec<FlatObject<'a>>) -> usize {
    let index = out.len();
    out.push(FlatObject {
        path: path.clone(),
        object: Object::Group(group),
        links: Vec::new(),
    });
    let mut links = Vec::with_capacity(group.children.len());
    for (name, node) in &group.children {
        let child_path = format!("{path}/{name}");
        let child = match node {
            Node::Group(g) => flatten(g, child_path, out),
            Node::Dataset(d) => {
                out.push(FlatObject {
                    path: child_path,
                    object: Object::Dataset(d),
                    links: Vec::new(),
                });
                out.len() - 1
            }
        };
        links.push((name.as_str(), child));
    }
    out[index].links = links;
    index
}

fn group_header(group: &Group, links: &[(&str, u64)]) -> Result<Vec<u8>, FormatError> {
    let mut w = ObjectHeaderWriter::new();
    w.add_message(MessageType::LinkInfo, link_message::serialize_link_info(OFFSET_SIZE))?;
    w.add_message(MessageType::GroupInfo, link_message::serialize_group_info())?;
    for &(name, address) in links {
        w.add_message(
            MessageType::Link,
            LinkMessage::hard(name, address).serialize(OFFSET_SIZE),
        )?;
    }
    for attr in &group.attributes {
        w.add_message(MessageType::Attribute, attr.serialize(LENGTH_SIZE))?;
    }
    Ok(w.serialize())
}

pub(crate) fn dataset_header(ds: &Dataset, index_address: Option<u64>) -> Result<Vec<u8>, FormatError> {
    let layout = ChunkedLayout {
        chunk_dims: ds.chunk_dims.iter().map(|&c| c as u32).collect(),
        element_size: ds.datatype.type_size(),
        params: ds.index_params,
        index_address,
    };
    let mut w = ObjectHeaderWriter::new();
    w.add_message_with_flags(MessageType::Datatype, ds.datatype.serialize(), MSG_FLAG_CONSTANT)?;
    w.add_message(
        MessageType::Dataspace,
        Dataspace::extensible(&ds.dims, &ds.max_dims).serialize(LENGTH_SIZE),
    )?;
    w.add_message_with_flags(MessageType::FillValue, FILL_VALUE_MESSAGE.to_vec(), MSG_FLAG_CONSTANT)?;
    w.add_message(MessageType::DataLayout, layout.serialize(OFFSET_SIZE))?;
    for attr in &ds.attributes {
        w.add_message(MessageType::Attribute, attr.serialize(LENGTH_SIZE))?;
    }
    Ok(w.serialize())
}

fn header(object: &FlatObject<'_>, addresses: &[u64], index_address: Option<u64>) -> Result<Vec<u8>, FormatError> {
    match object.object {
        Object::Group(g) => {
            let links: Vec<(&str, u64)> = object
                .links
                .iter()
                .map(|&(name, child)| (name, addresses[child]))
                .collect();
            group_header(g, &links)
        }
        Object::Dataset(d) => dataset_header(d, index_address),
    }
}

/// Chunks of a dataset followed by their index, as placed at `base`.
struct StoredChunks {
    bytes: Vec<u8>,
    chunks: BTreeMap<u64, u64>,
    index: Option<ArrayLayout>,
}

/// Write the chunks of `ds` and its chunk index at `base`. No index is
/// written when no chunk ever was.
fn dataset_storage(ds: &Dataset, base: u64) -> Result<StoredChunks, FormatError> {
    if ds.chunks.is_empty() {
        return Ok(StoredChunks {
            bytes: Vec::new(),
            chunks: BTreeMap::new(),
            index: None,
        });
    }
    let mut ordered: Vec<(u64, &Vec<u8>)> = ds
        .chunks
        .iter()
        .map(|(scaled, data)| (ds.linear_index(scaled), data))
        .collect();
    ordered.sort_unstable_by_key(|&(index, _)| index);

    let mut chunks = BTreeMap::new();
    let mut bytes = Vec::new();
    for (index, data) in ordered {
        chunks.insert(index, base + bytes.len() as u64);
        bytes.extend_from_slice(data);
    }
    let index_address = base + bytes.len() as u64;
    let (encoded, index) = extensible_array::build_with_layout(
        &chunks,
        ds.index_params,
        index_address,
        OFFSET_SIZE,
        LENGTH_SIZE,
    )?;
    bytes.extend_from_slice(&encoded);
    Ok(StoredChunks {
        bytes,
        chunks,
        index: Some(index),
    })
}

impl FileImage {
    /// Serialize the whole image as an HDF5 file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        self.to_bytes_with_layout().map(|(bytes, _)| bytes)
    }

    /// Serialize the whole image, also returning where everything went so
    /// that later appends can be written in place.
    pub fn to_bytes_with_layout(&self) -> Result<(Vec<u8>, FileLayout), FormatError> {
        let mut objects = Vec::new();
        flatten(&self.root, String::new(), &mut objects);

        // Header sizes do not depend on the addresses they carry.
        let placeholder = vec![0u64; objects.len()];
        let mut addresses = Vec::with_capacity(objects.len());
        let mut header_lens = Vec::with_capacity(objects.len());
        let mut cursor = SUPERBLOCK_SIZE as u64;
        for object in &objects {
            let len = header(object, &placeholder, Some(0))?.len();
            addresses.push(cursor);
            header_lens.push(len);
            cursor += len as u64;
        }

        let mut data = Vec::new();
        let mut index_addresses = vec![None; objects.len()];
        let mut datasets = BTreeMap::new();
        for (i, object) in objects.iter().enumerate() {
            if let Object::Dataset(ds) = object.object {
                let storage = dataset_storage(ds, cursor + data.len() as u64)?;
                data.extend_from_slice(&storage.bytes);
                index_addresses[i] = storage.index.as_ref().map(ArrayLayout::address);
                datasets.insert(
                    object.path.clone(),
                    DatasetLayout {
                        header_address: addresses[i],
                        header_len: header_lens[i],
                        dims: ds.dims.clone(),
                        chunks: storage.chunks,
                        index: storage.index,
                    },
                );
            }
        }

        let eof = cursor + data.len() as u64;
        let mut out = Superblock::v3(eof, SUPERBLOCK_SIZE as u64).serialize();
        out.reserve(eof as usize - out.len());
        for (object, &index_address) in objects.iter().zip(&index_addresses) {
            out.extend_from_slice(&header(object, &addresses, index_address)?);
        }
        debug_assert_eq!(out.len() as u64, cursor);
        out.extend_from_slice(&data);
        let layout = FileLayout {
            root_address: SUPERBLOCK_SIZE as u64,
            eof,
            datasets,
        };
        Ok((out, layout))
    }
}
