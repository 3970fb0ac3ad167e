//! Storage backend seam between the acquisition logic and the file format.
//!
//! [`Storage`] is the narrow set of primitives the growth engine and
//! attribute writer need. [`FileStore`] implements it over an in-memory
//! [`FileImage`] that is written back to its file on flush.
//!
//! Flushing after appends writes only the new chunks at the end of the
//! file plus the few metadata blocks that changed. Structural changes
//! (new groups, datasets or attributes, removals, shrinking below the
//! stored extent) and [`Storage::compact`] rewrite the whole file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hdaq_format::attribute::AttributeMessage;
use hdaq_format::datatype::Datatype;
use hdaq_format::selection::Selection;
use hdaq_format::{FileImage, FileLayout, FormatError, Patch};
use tracing::{debug, trace};

use crate::config::FlushPolicy;
use crate::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Shape and type of a stored dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMeta {
    pub datatype: Datatype,
    pub dims: Vec<u64>,
    pub max_dims: Vec<u64>,
    pub chunk_dims: Vec<u64>,
}

/// Primitives over an open container. Paths are absolute object paths.
pub trait Storage {
    /// File backing this store.
    fn path(&self) -> &Path;

    /// Create a group and any missing parents.
    fn create_group_all(&mut self, path: &str) -> StorageResult<()>;

    /// Create a chunked dataset with one unlimited dimension. The parent
    /// group must exist.
    fn create_dataset(
        &mut self,
        path: &str,
        datatype: &Datatype,
        dims: &[u64],
        max_dims: &[u64],
        chunk_dims: &[u64],
    ) -> StorageResult<()>;

    /// Metadata of the dataset at `path`, `None` if there is none.
    fn open_dataset(&self, path: &str) -> StorageResult<Option<DatasetMeta>>;

    /// Current extent of a dataset.
    fn extent(&self, path: &str) -> StorageResult<Vec<u64>>;

    /// Grow or shrink a dataset's extent.
    fn set_extent(&mut self, path: &str, dims: &[u64]) -> StorageResult<()>;

    /// Write raw little-endian elements into a selection.
    fn write_selection(&mut self, path: &str, selection: &Selection, data: &[u8]) -> StorageResult<()>;

    /// Read the raw elements of a selection.
    fn read_selection(&self, path: &str, selection: &Selection) -> StorageResult<Vec<u8>>;

    /// Attach a one-dimensional attribute; its length is implied by
    /// `data.len()`.
    fn create_attribute(&mut self, path: &str, name: &str, datatype: &Datatype, data: &[u8]) -> StorageResult<()>;

    /// Datatype and raw value of an attribute.
    fn read_attribute(&self, path: &str, name: &str) -> StorageResult<(Datatype, Vec<u8>)>;

    /// Detach an attribute.
    fn remove_attribute(&mut self, path: &str, name: &str) -> StorageResult<()>;

    /// Unlink an object.
    fn remove(&mut self, path: &str) -> StorageResult<()>;

    /// Absolute paths of all datasets.
    fn dataset_paths(&self) -> Vec<String>;

    /// Mark the end of a successful logical operation.
    fn commit(&mut self) -> StorageResult<()>;

    /// Write all pending changes to disk.
    fn flush(&mut self) -> StorageResult<()>;

    /// Rewrite the whole file from the in-memory state.
    fn compact(&mut self) -> StorageResult<()>;

    /// Flush and release the file. Later calls are no-ops.
    fn close(&mut self) -> StorageResult<()>;
}

/// [`Storage`] backed by an HDF5 file on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: Option<File>,
    image: FileImage,
    policy: FlushPolicy,
    /// Placement of the file on disk; `None` when the next flush must
    /// rewrite everything.
    layout: Option<FileLayout>,
    /// Chunks written and extents changed since the last flush.
    touched: BTreeMap<String, BTreeSet<u64>>,
    dirty: bool,
}

impl FileStore {
    /// Create (or truncate) the file at `path` and write an empty
    /// container to it right away.
    pub fn create(path: impl AsRef<Path>, policy: FlushPolicy) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut store = Self {
            path,
            file: Some(file),
            image: FileImage::new(),
            policy,
            layout: None,
            touched: BTreeMap::new(),
            dirty: true,
        };
        store.flush()?;
        Ok(store)
    }

    /// Open an existing container file for reading and writing.
    pub fn open(path: impl AsRef<Path>, policy: FlushPolicy) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let (image, layout) = FileImage::from_bytes_with_layout(&bytes)?;
        debug!(path = %path.display(), in_place = layout.is_some(), "loaded container");
        Ok(Self {
            path,
            file: Some(file),
            image,
            policy,
            layout,
            touched: BTreeMap::new(),
            dirty: false,
        })
    }

    /// The in-memory container.
    pub fn image(&self) -> &FileImage {
        &self.image
    }

    /// Size of the file as last written.
    pub fn stored_len(&self) -> Option<u64> {
        self.layout.as_ref().map(FileLayout::eof)
    }

    /// Record a change that only appends to or rewrites chunks of `path`.
    fn touch(&mut self, path: &str, chunks: BTreeSet<u64>) {
        self.touched.entry(path.to_string()).or_default().extend(chunks);
        self.dirty = true;
    }

    /// Record a change that moves objects around; the next flush rewrites
    /// the file.
    fn restructure(&mut self) {
        self.layout = None;
        self.touched.clear();
        self.dirty = true;
    }
}

fn write_patches(file: &mut File, patches: &[Patch]) -> std::io::Result<usize> {
    let mut written = 0;
    for patch in patches {
        file.seek(SeekFrom::Start(patch.offset))?;
        file.write_all(&patch.bytes)?;
        written += patch.bytes.len();
    }
    Ok(written)
}

impl Storage for FileStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn create_group_all(&mut self, path: &str) -> StorageResult<()> {
        let existed = self.image.contains(path);
        self.image.create_group_all(path)?;
        if !existed {
            self.restructure();
        }
        Ok(())
    }

    fn create_dataset(
        &mut self,
        path: &str,
        datatype: &Datatype,
        dims: &[u64],
        max_dims: &[u64],
        chunk_dims: &[u64],
    ) -> StorageResult<()> {
        self.image
            .create_dataset(path, datatype.clone(), dims, max_dims, chunk_dims)?;
        self.restructure();
        Ok(())
    }

    fn open_dataset(&self, path: &str) -> StorageResult<Option<DatasetMeta>> {
        match self.image.dataset(path) {
            Ok(ds) => Ok(Some(DatasetMeta {
                datatype: ds.datatype().clone(),
                dims: ds.dims().to_vec(),
                max_dims: ds.max_dims().to_vec(),
                chunk_dims: ds.chunk_dims().to_vec(),
            })),
            Err(
                FormatError::PathNotFound(_)
                | FormatError::InvalidPath(_)
                | FormatError::NotAGroup(_)
                | FormatError::NotADataset(_),
            ) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn extent(&self, path: &str) -> StorageResult<Vec<u64>> {
        Ok(self.image.dataset(path)?.dims().to_vec())
    }

    fn set_extent(&mut self, path: &str, dims: &[u64]) -> StorageResult<()> {
        let dataset = self.image.dataset_mut(path)?;
        let shrinks = dims.iter().zip(dataset.dims()).any(|(new, old)| new < old);
        dataset.set_extent(dims)?;
        let below_stored = self
            .layout
            .as_ref()
            .and_then(|layout| layout.stored_dims(path))
            .is_some_and(|stored| dims.iter().zip(stored).any(|(new, old)| new < old));
        if shrinks && below_stored {
            self.restructure();
        } else {
            self.touch(path, BTreeSet::new());
        }
        Ok(())
    }

    fn write_selection(&mut self, path: &str, selection: &Selection, data: &[u8]) -> StorageResult<()> {
        let dataset = self.image.dataset_mut(path)?;
        let chunks = dataset.chunk_indices(selection)?;
        dataset.write_selection(selection, data)?;
        self.touch(path, chunks);
        Ok(())
    }

    fn read_selection(&self, path: &str, selection: &Selection) -> StorageResult<Vec<u8>> {
        Ok(self.image.dataset(path)?.read_selection(selection)?)
    }

    fn create_attribute(&mut self, path: &str, name: &str, datatype: &Datatype, data: &[u8]) -> StorageResult<()> {
        let size = datatype.type_size() as usize;
        if size == 0 || data.len() % size != 0 {
            return Err(FormatError::DataSizeMismatch {
                expected: data.len() / size.max(1) * size,
                actual: data.len(),
            }
            .into());
        }
        let attribute = AttributeMessage::new(name, datatype.clone(), data.to_vec());
        self.image.create_attribute(path, attribute)?;
        self.restructure();
        Ok(())
    }

    fn read_attribute(&self, path: &str, name: &str) -> StorageResult<(Datatype, Vec<u8>)> {
        let attr = self.image.attribute(path, name)?;
        Ok((attr.datatype.clone(), attr.raw_data.clone()))
    }

    fn remove_attribute(&mut self, path: &str, name: &str) -> StorageResult<()> {
        self.image.remove_attribute(path, name)?;
        self.restructure();
        Ok(())
    }

    fn remove(&mut self, path: &str) -> StorageResult<()> {
        self.image.remove(path)?;
        self.restructure();
        Ok(())
    }

    fn dataset_paths(&self) -> Vec<String> {
        self.image.dataset_paths()
    }

    fn commit(&mut self) -> StorageResult<()> {
        match self.policy {
            FlushPolicy::EveryWrite => self.flush(),
            FlushPolicy::Manual => Ok(()),
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        // Both are dropped if this fails part way, so the next flush
        // rewrites the file from scratch.
        let touched = std::mem::take(&mut self.touched);
        let mut layout = self.layout.take();
        let patches = match layout.as_mut() {
            Some(layout) => self.image.append_patches(layout, &touched)?,
            None => None,
        };
        let (written, layout, rewrite) = match (patches, layout) {
            (Some(patches), Some(layout)) => (write_patches(file, &patches)?, layout, false),
            _ => {
                let (bytes, layout) = self.image.to_bytes_with_layout()?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&bytes)?;
                file.set_len(bytes.len() as u64)?;
                (bytes.len(), layout, true)
            }
        };
        file.flush()?;
        self.layout = Some(layout);
        self.dirty = false;
        trace!(path = %self.path.display(), bytes = written, rewrite, "flushed container");
        Ok(())
    }

    fn compact(&mut self) -> StorageResult<()> {
        self.restructure();
        self.flush()
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let result = self.flush();
        self.file = None;
        result
    }
}
