//! Placement of a written file, and in-place updates for appended chunks.
//!
//! [`FileImage::to_bytes_with_layout`] and
//! [`FileImage::from_bytes_with_layout`] report where each dataset's
//! header, chunks and chunk index sit. [`FileImage::append_patches`] then
//! turns chunk writes and extent growth into a few byte ranges: new chunks
//! and index blocks go at the end of the file, while the dataset header,
//! the touched index blocks and the superblock are rewritten where they
//! are. Bytes of chunks already on disk are only written again when their
//! contents changed.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::FormatError;
use crate::extensible_array::ArrayLayout;
use crate::file_image::{canonical_path, FileImage};
use crate::file_writer::{self, LENGTH_SIZE, OFFSET_SIZE};
use crate::superblock::Superblock;

/// Bytes to write at a file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Patch {
    pub fn new(offset: u64, bytes: Vec<u8>) -> Self {
        Self { offset, bytes }
    }
}

/// Where a dataset lives in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DatasetLayout {
    pub(crate) header_address: u64,
    pub(crate) header_len: usize,
    /// Extent recorded in the stored dataspace message.
    pub(crate) dims: Vec<u64>,
    /// Chunk index position to chunk address.
    pub(crate) chunks: BTreeMap<u64, u64>,
    pub(crate) index: Option<ArrayLayout>,
}

/// Where the objects of a written file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    pub(crate) root_address: u64,
    pub(crate) eof: u64,
    /// Keyed by canonical dataset path (`/group/name`).
    pub(crate) datasets: BTreeMap<String, DatasetLayout>,
}

impl FileLayout {
    /// End of the allocated file space.
    pub fn eof(&self) -> u64 {
        self.eof
    }

    /// Extent of the dataset at `path` as stored on disk.
    pub fn stored_dims(&self, path: &str) -> Option<&[u64]> {
        let key = canonical_path(path).ok()?;
        self.datasets.get(&key).map(|d| d.dims.as_slice())
    }
}

impl FileImage {
    /// Writes that bring a file laid out as `layout` up to date with this
    /// image, given the chunks written since (`touched` maps dataset paths
    /// to chunk index positions; an empty set records an extent change).
    ///
    /// Returns `None` when the changes cannot be applied in place, e.g. a
    /// dataset shrank below its stored extent or is not in the layout; the
    /// whole file must then be rewritten and `layout` is stale. Patches are
    /// ordered so that space past the old end of file is written before
    /// anything pointing into it.
    pub fn append_patches(
        &self,
        layout: &mut FileLayout,
        touched: &BTreeMap<String, BTreeSet<u64>>,
    ) -> Result<Option<Vec<Patch>>, FormatError> {
        let old_eof = layout.eof;
        let mut eof = layout.eof;
        let mut appended = Vec::new();
        let mut in_place = Vec::new();

        for (path, indices) in touched {
            let ds = self.dataset(path)?;
            let Some(stored) = layout.datasets.get_mut(&canonical_path(path)?) else {
                return Ok(None);
            };
            if ds.dims.len() != stored.dims.len() || ds.dims.iter().zip(&stored.dims).any(|(n, s)| n < s) {
                return Ok(None);
            }

            let chunk_len = ds.chunk_len() as u64;
            let mut added = Vec::new();
            for &index in indices {
                let Some(chunk) = ds.chunks.get(&ds.scaled_from_index(index)) else {
                    continue;
                };
                match stored.chunks.get(&index) {
                    Some(&address) => in_place.push(Patch::new(address, chunk.clone())),
                    None => {
                        stored.chunks.insert(index, eof);
                        appended.push(Patch::new(eof, chunk.clone()));
                        eof += chunk_len;
                        added.push(index);
                    }
                }
            }

            let mut header_changed = ds.dims != stored.dims;
            if !added.is_empty() {
                if stored.index.is_none() {
                    stored.index = Some(ArrayLayout::allocate(ds.index_params, &mut eof, OFFSET_SIZE, LENGTH_SIZE)?);
                    header_changed = true;
                }
                if let Some(index) = stored.index.as_mut() {
                    for patch in index.update(&stored.chunks, added, &mut eof, OFFSET_SIZE, LENGTH_SIZE)? {
                        if patch.offset >= old_eof {
                            appended.push(patch);
                        } else {
                            in_place.push(patch);
                        }
                    }
                }
            }

            if header_changed {
                let header = file_writer::dataset_header(ds, stored.index.as_ref().map(ArrayLayout::address))?;
                if header.len() != stored.header_len {
                    return Ok(None);
                }
                stored.dims = ds.dims.clone();
                in_place.push(Patch::new(stored.header_address, header));
            }
        }

        if eof != old_eof {
            layout.eof = eof;
            in_place.push(Patch::new(0, Superblock::v3(eof, layout.root_address).serialize()));
        }
        appended.extend(in_place);
        Ok(Some(appended))
    }
}

/// Apply patches to an in-memory file, growing it as needed.
#[cfg(test)]
pub(crate) fn apply(file: &mut Vec<u8>, patches: &[Patch]) {
    for patch in patches {
        let start = patch.offset as usize;
        let end = start + patch.bytes.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(&patch.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::UNLIMITED;
    use crate::datatype::Datatype;
    use crate::selection::Selection;

    fn column(image: &mut FileImage, path: &str) {
        image
            .create_dataset(path, Datatype::float64(), &[2, 0], &[2, UNLIMITED], &[2, 1])
            .unwrap();
    }

    /// Grow `path` by one unit and return the touched chunk positions.
    fn append(image: &mut FileImage, path: &str, value: f64) -> BTreeSet<u64> {
        let ds = image.dataset_mut(path).unwrap();
        let k = ds.dims()[1];
        ds.set_extent(&[2, k + 1]).unwrap();
        let selection = Selection::hyperslab(&[0, k], &[2, 1]);
        let touched = ds.chunk_indices(&selection).unwrap();
        let raw: Vec<u8> = [value, -value].iter().flat_map(|v| v.to_le_bytes()).collect();
        ds.write_selection(&selection, &raw).unwrap();
        touched
    }

    #[test]
    fn layouts_agree_between_writer_and_reader() {
        let mut image = FileImage::new();
        image.create_group_all("/g").unwrap();
        column(&mut image, "/g/a");
        column(&mut image, "/b");
        for k in 0..50 {
            append(&mut image, "/g/a", k as f64);
        }
        let (bytes, layout) = image.to_bytes_with_layout().unwrap();
        assert_eq!(layout.eof(), bytes.len() as u64);
        assert_eq!(layout.stored_dims("g/a"), Some(&[2, 50][..]));
        assert_eq!(layout.stored_dims("/b"), Some(&[2, 0][..]));

        let (loaded, reported) = FileImage::from_bytes_with_layout(&bytes).unwrap();
        assert_eq!(loaded, image);
        assert_eq!(reported, Some(layout));
    }

    #[test]
    fn appends_patch_a_written_file() {
        let mut image = FileImage::new();
        column(&mut image, "/a");
        column(&mut image, "/b");
        append(&mut image, "/a", 1.0);
        let (mut file, mut layout) = image.to_bytes_with_layout().unwrap();

        for k in 1..400 {
            let mut touched = BTreeMap::new();
            touched.insert("/a".to_string(), append(&mut image, "/a", k as f64));
            if k % 3 == 0 {
                touched.insert("b".to_string(), append(&mut image, "b", -(k as f64)));
            }
            let stored: Vec<u64> = layout.datasets.values().flat_map(|d| d.chunks.values().copied()).collect();
            let patches = image.append_patches(&mut layout, &touched).unwrap().unwrap();
            // chunks already on disk are left alone
            for patch in &patches {
                let end = patch.offset + patch.bytes.len() as u64;
                assert!(stored.iter().all(|&a| end <= a || a + 16 <= patch.offset));
            }
            apply(&mut file, &patches);
            assert_eq!(file.len() as u64, layout.eof());
        }

        let (loaded, reported) = FileImage::from_bytes_with_layout(&file).unwrap();
        assert_eq!(loaded, image);
        assert_eq!(reported, Some(layout));
    }

    #[test]
    fn one_append_costs_one_chunk() {
        let mut image = FileImage::new();
        column(&mut image, "/a");
        for k in 0..1000 {
            append(&mut image, "/a", k as f64);
        }
        let (mut file, mut layout) = image.to_bytes_with_layout().unwrap();
        let mut touched = BTreeMap::new();
        touched.insert("/a".to_string(), append(&mut image, "/a", 1000.0));
        let patches = image.append_patches(&mut layout, &touched).unwrap().unwrap();
        let before = file.len();
        apply(&mut file, &patches);
        // unit 1000 lands inside an existing index data block
        assert_eq!(file.len() - before, 16);
        let written: usize = patches.iter().map(|p| p.bytes.len()).sum();
        assert!(written < 512, "wrote {written} bytes");
        assert_eq!(FileImage::from_bytes(&file).unwrap(), image);
    }

    #[test]
    fn first_chunk_allocates_the_index() {
        let mut image = FileImage::new();
        column(&mut image, "/a");
        let (mut file, mut layout) = image.to_bytes_with_layout().unwrap();
        let mut touched = BTreeMap::new();
        touched.insert("/a".to_string(), append(&mut image, "/a", 3.5));
        let patches = image.append_patches(&mut layout, &touched).unwrap().unwrap();
        apply(&mut file, &patches);
        assert_eq!(FileImage::from_bytes(&file).unwrap(), image);
    }

    #[test]
    fn rewritten_chunk_is_patched_where_it_is() {
        let mut image = FileImage::new();
        column(&mut image, "/a");
        append(&mut image, "/a", 1.0);
        let (mut file, mut layout) = image.to_bytes_with_layout().unwrap();
        let ds = image.dataset_mut("/a").unwrap();
        let selection = Selection::hyperslab(&[0, 0], &[2, 1]);
        let touched_chunks = ds.chunk_indices(&selection).unwrap();
        let raw: Vec<u8> = [7.0f64, 8.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        ds.write_selection(&selection, &raw).unwrap();

        let mut touched = BTreeMap::new();
        touched.insert("/a".to_string(), touched_chunks);
        let patches = image.append_patches(&mut layout, &touched).unwrap().unwrap();
        assert_eq!(patches.len(), 1);
        let len = file.len();
        apply(&mut file, &patches);
        assert_eq!(file.len(), len);
        assert_eq!(FileImage::from_bytes(&file).unwrap(), image);
    }

    #[test]
    fn shrinking_below_stored_extent_needs_rewrite() {
        let mut image = FileImage::new();
        column(&mut image, "/a");
        append(&mut image, "/a", 1.0);
        append(&mut image, "/a", 2.0);
        let (_, mut layout) = image.to_bytes_with_layout().unwrap();
        image.dataset_mut("/a").unwrap().set_extent(&[2, 1]).unwrap();
        let mut touched = BTreeMap::new();
        touched.insert("/a".to_string(), BTreeSet::new());
        assert_eq!(image.append_patches(&mut layout, &touched).unwrap(), None);
    }

    #[test]
    fn unknown_dataset_needs_rewrite() {
        let mut image = FileImage::new();
        let (_, mut layout) = image.to_bytes_with_layout().unwrap();
        column(&mut image, "/a");
        let mut touched = BTreeMap::new();
        touched.insert("/a".to_string(), append(&mut image, "/a", 1.0));
        assert_eq!(image.append_patches(&mut layout, &touched).unwrap(), None);
    }

    #[test]
    fn foreign_superblock_has_no_layout() {
        let image = FileImage::new();
        let mut bytes = vec![0u8; 512];
        let mut file = image.to_bytes().unwrap();
        file[12..20].copy_from_slice(&512u64.to_le_bytes());
        let checksum = crate::checksum::jenkins_lookup3(&file[..44]);
        file[44..48].copy_from_slice(&checksum.to_le_bytes());
        bytes.extend_from_slice(&file);
        let (loaded, layout) = FileImage::from_bytes_with_layout(&bytes).unwrap();
        assert_eq!(loaded, image);
        assert_eq!(layout, None);
    }
}
