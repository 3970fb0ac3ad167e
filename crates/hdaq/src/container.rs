//! The container handle: one open HDF5 file plus its dataset registry.

use std::path::Path;

use hdaq_format::FormatError;
use tracing::{error, info, warn};

use crate::attribute::{self, Attribute};
use crate::config::ContainerOptions;
use crate::error::{Error, Result, StorageError};
use crate::growth::{self, unit_selection, Unit};
use crate::name::{resolve, DatasetName};
use crate::naming::unique_path;
use crate::registry::{DatasetHandle, Registry};
use crate::store::{FileStore, Storage};
use crate::types::{Element, ElementType, Values};

/// An open container file accumulating growable datasets.
///
/// ```no_run
/// use hdaq::Container;
///
/// let mut run = Container::create("run")?;
/// run.insert(&[0.0, 0.25, 1.0], "temp")?;
/// run.insert(&[0.1, 0.35, 1.1], "temp")?;
/// run.write_attribute("temp", "units", &[1i32, 0, 0])?;
/// assert_eq!(run.dataset_info("temp")?.growth(), 2);
/// # Ok::<(), hdaq::Error>(())
/// ```
pub struct Container {
    store: Option<Box<dyn Storage>>,
    registry: Registry,
    options: ContainerOptions,
}

impl Container {
    /// Create a container at the first free `base[N].h5`.
    pub fn create(base: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(base, ContainerOptions::default())
    }

    /// Create a container at the first free `base[N].<extension>`.
    pub fn create_with(base: impl AsRef<Path>, options: ContainerOptions) -> Result<Self> {
        let path = unique_path(base, &options.extension);
        let store = FileStore::create(&path, options.flush_policy).map_err(|e| {
            error!(path = %path.display(), error = %e, "could not create container");
            e
        })?;
        info!(path = %path.display(), "created container");
        Ok(Self::with_storage(Box::new(store), options))
    }

    /// Open an existing container file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ContainerOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ContainerOptions) -> Result<Self> {
        let store = open_store(path.as_ref(), &options)?;
        Ok(Self::with_storage(Box::new(store), options))
    }

    /// Wrap an already open storage backend.
    pub fn with_storage(store: Box<dyn Storage>, options: ContainerOptions) -> Self {
        Self {
            store: Some(store),
            registry: Registry::default(),
            options,
        }
    }

    /// File currently open, `None` once closed.
    pub fn path(&self) -> Option<&Path> {
        self.store.as_deref().map(|s| s.path())
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// Close the current file and continue with the existing file at
    /// `path`. On failure the container stays closed.
    pub fn retarget(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.registry.clear();
        self.close()?;
        let store = open_store(path, &self.options)?;
        self.store = Some(Box::new(store));
        info!(path = %path.display(), "retargeted container");
        Ok(())
    }

    /// Write pending changes to disk.
    pub fn flush(&mut self) -> Result<()> {
        let store = self.store.as_deref_mut().ok_or(Error::Closed)?;
        logged("flush", store.flush().map_err(Error::from))
    }

    /// Rewrite the whole file in its canonical order: every dataset's
    /// chunks contiguous and followed by their index. Appends never need
    /// this; it tidies a file after a failed flush or for archiving.
    pub fn compact(&mut self) -> Result<()> {
        let store = self.store.as_deref_mut().ok_or(Error::Closed)?;
        logged("compact", store.compact().map_err(Error::from))
    }

    /// Flush and release the file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut store) = self.store.take() else {
            return Ok(());
        };
        logged("close", store.close().map_err(Error::from))?;
        info!(path = %store.path().display(), "closed container");
        Ok(())
    }

    /// Append `values` as one unit of the dataset `name`, creating the
    /// dataset on first use. Returns the dataset's growth count.
    pub fn insert<T: Element>(&mut self, values: &[T], name: &str) -> Result<u64> {
        let result = self.insert_unit(name, &Unit::encode(values));
        logged("insert", result)
    }

    /// Create `name` with `row_count` values per unit before the first
    /// insert. The first unit is zero-filled.
    pub fn create_dataset<T: Element>(&mut self, name: &str, row_count: usize) -> Result<()> {
        let result = self.create_unit(name, &Unit::zeroed(T::ELEMENT_TYPE, row_count));
        logged("create_dataset", result)
    }

    pub fn insert_attribute<T: Element>(&mut self, attribute: &Attribute<T>, dataset: &str) -> Result<()> {
        self.write_attribute(dataset, &attribute.name, &attribute.values)
    }

    /// Attach the attribute `name` to an existing dataset.
    pub fn write_attribute<T: Element>(&mut self, dataset: &str, name: &str, values: &[T]) -> Result<()> {
        let result = self.attribute_unit(dataset, name, &Unit::encode(values));
        logged("write_attribute", result)
    }

    /// Whether `name` refers to a registered or stored dataset.
    pub fn contains(&self, name: &str) -> bool {
        self.describe(name).is_ok()
    }

    pub fn dataset_info(&self, name: &str) -> Result<DatasetHandle> {
        logged("dataset_info", self.describe(name))
    }

    /// Absolute paths of every dataset in the file.
    pub fn dataset_names(&self) -> Result<Vec<String>> {
        let store = self.store.as_deref().ok_or(Error::Closed)?;
        Ok(store.dataset_paths())
    }

    /// Values of unit `index` of the dataset `name`.
    pub fn read_unit(&self, name: &str, index: u64) -> Result<Values> {
        let result = self.describe(name).and_then(|h| self.read_handle_unit(&h, index));
        logged("read_unit", result)
    }

    /// Every unit of the dataset `name`, oldest first.
    pub fn read_all(&self, name: &str) -> Result<Vec<Values>> {
        let result = self
            .describe(name)
            .and_then(|h| (0..h.growth).map(|i| self.read_handle_unit(&h, i)).collect());
        logged("read_all", result)
    }

    pub fn read_attribute(&self, dataset: &str, name: &str) -> Result<Values> {
        logged("read_attribute", self.attribute_values(dataset, name))
    }

    fn store(&self) -> Result<&dyn Storage> {
        self.store.as_deref().ok_or(Error::Closed)
    }

    fn parts(&mut self) -> Result<(&mut dyn Storage, &mut Registry)> {
        let store: &mut dyn Storage = self.store.as_deref_mut().ok_or(Error::Closed)?;
        Ok((store, &mut self.registry))
    }

    fn insert_unit(&mut self, name: &str, unit: &Unit) -> Result<u64> {
        let create_groups = self.options.create_intermediate_groups;
        let name = resolve(name);
        let (store, registry) = self.parts()?;
        if ensure_registered(store, registry, &name)? {
            growth::append(store, registry, &name.leaf, unit)
        } else {
            growth::create(store, registry, &name, unit, create_groups)?;
            Ok(1)
        }
    }

    fn create_unit(&mut self, name: &str, unit: &Unit) -> Result<()> {
        let create_groups = self.options.create_intermediate_groups;
        let name = resolve(name);
        let (store, registry) = self.parts()?;
        if ensure_registered(store, registry, &name)? {
            return Err(Error::AlreadyExists(name.path()));
        }
        growth::create(store, registry, &name, unit, create_groups)
    }

    fn attribute_unit(&mut self, dataset: &str, name: &str, unit: &Unit) -> Result<()> {
        let target = resolve(dataset);
        let (store, registry) = self.parts()?;
        if !ensure_registered(store, registry, &target)? {
            return Err(Error::NotFound(dataset.to_string()));
        }
        let path = match registry.lookup(&target.leaf) {
            Some(handle) => handle.path.clone(),
            None => return Err(Error::NotFound(dataset.to_string())),
        };
        attribute::write(store, &path, name, unit)
    }

    fn describe(&self, name: &str) -> Result<DatasetHandle> {
        let store = self.store()?;
        let name = resolve(name);
        if let Some(handle) = self.registry.lookup(&name.leaf) {
            return Ok(handle.clone());
        }
        growth::open_existing(store, &name)?.ok_or_else(|| Error::NotFound(name.path()))
    }

    fn read_handle_unit(&self, handle: &DatasetHandle, index: u64) -> Result<Values> {
        let raw = self
            .store()?
            .read_selection(&handle.path, &unit_selection(handle.row_count, index))?;
        Ok(Values::decode(handle.element_type, &raw)?)
    }

    fn attribute_values(&self, dataset: &str, name: &str) -> Result<Values> {
        let handle = self.describe(dataset)?;
        let (datatype, raw) = self.store()?.read_attribute(&handle.path, name)?;
        let element_type = ElementType::from_datatype(&datatype).ok_or_else(|| {
            Error::Storage(StorageError::Format(FormatError::UnsupportedDatatypeClass(
                datatype.class(),
            )))
        })?;
        Ok(Values::decode(element_type, &raw)?)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Some(mut store) = self.store.take() {
            if let Err(e) = store.close() {
                error!(path = %store.path().display(), error = %e, "could not flush container on drop");
            }
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.path())
            .field("datasets", &self.registry.names())
            .field("options", &self.options)
            .finish()
    }
}

fn open_store(path: &Path, options: &ContainerOptions) -> Result<FileStore> {
    let store = FileStore::open(path, options.flush_policy).map_err(|e| {
        error!(path = %path.display(), error = %e, "could not open container");
        e
    })?;
    info!(path = %path.display(), "opened container");
    Ok(store)
}

/// Make sure `name` is in the registry, loading it from disk on a miss.
/// Returns `false` if the dataset exists nowhere.
fn ensure_registered(store: &dyn Storage, registry: &mut Registry, name: &DatasetName) -> Result<bool> {
    if let Some(handle) = registry.lookup(&name.leaf) {
        let requested = name.path();
        if handle.path != requested {
            warn!(
                requested = %requested,
                registered = %handle.path,
                "leaf name already registered under another group"
            );
        }
        return Ok(true);
    }
    match growth::open_existing(store, name)? {
        Some(handle) => {
            registry.insert(name.leaf.clone(), handle);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Log storage failures as they leave the public API.
fn logged<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    if let Err(Error::Storage(e)) = &result {
        error!(operation, error = %e, "storage operation failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushPolicy;

    fn temp_container(dir: &tempfile::TempDir) -> Container {
        Container::create(dir.path().join("run")).unwrap()
    }

    #[test]
    fn create_claims_unique_name() {
        let dir = tempfile::tempdir().unwrap();
        let first = temp_container(&dir);
        let second = temp_container(&dir);
        assert_eq!(first.path().unwrap(), dir.path().join("run.h5"));
        assert_eq!(second.path().unwrap(), dir.path().join("run1.h5"));
        assert!(dir.path().join("run1.h5").exists());
    }

    #[test]
    fn insert_creates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = temp_container(&dir);
        assert_eq!(c.insert(&[1i32, 2, 3], "counts").unwrap(), 1);
        assert_eq!(c.insert(&[4i32, 5, 6], "counts").unwrap(), 2);
        let info = c.dataset_info("counts").unwrap();
        assert_eq!(info.path(), "/counts");
        assert_eq!(info.row_count(), 3);
        assert_eq!(info.element_type(), ElementType::Int32);
        assert_eq!(
            c.read_all("counts").unwrap(),
            vec![Values::Int32(vec![1, 2, 3]), Values::Int32(vec![4, 5, 6])]
        );
    }

    #[test]
    fn explicit_create_fixes_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = temp_container(&dir);
        c.create_dataset::<f32>("det/adc", 2).unwrap();
        assert!(matches!(
            c.create_dataset::<f32>("det/adc", 2),
            Err(Error::AlreadyExists(p)) if p == "/det/adc"
        ));
        assert!(matches!(
            c.insert(&[1.0f32], "det/adc"),
            Err(Error::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
        assert_eq!(c.insert(&[1.0f32, 2.0], "det/adc").unwrap(), 2);
        assert_eq!(c.read_unit("det/adc", 0).unwrap(), Values::Float32(vec![0.0, 0.0]));
        assert!(matches!(c.create_dataset::<f64>("z", 0), Err(Error::EmptyRow(_))));
    }

    #[test]
    fn attributes_need_a_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = temp_container(&dir);
        assert!(matches!(
            c.write_attribute("missing", "units", &[1i32]),
            Err(Error::NotFound(n)) if n == "missing"
        ));
        c.insert(&[0.5f64], "temp").unwrap();
        c.insert_attribute(&Attribute::new("range", vec![0.0f64, 10.0]), "temp")
            .unwrap();
        assert_eq!(
            c.read_attribute("temp", "range").unwrap(),
            Values::Float64(vec![0.0, 10.0])
        );
        assert!(matches!(c.read_attribute("temp", "nope"), Err(Error::Storage(_))));
    }

    #[test]
    fn closed_container_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = temp_container(&dir);
        c.close().unwrap();
        c.close().unwrap();
        assert!(!c.is_open());
        assert!(c.path().is_none());
        assert!(matches!(c.insert(&[1i32], "x"), Err(Error::Closed)));
        assert!(matches!(c.flush(), Err(Error::Closed)));
        assert!(matches!(c.dataset_info("x"), Err(Error::Closed)));
    }

    #[test]
    fn failed_retarget_leaves_container_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = temp_container(&dir);
        c.insert(&[true], "flag").unwrap();
        assert!(c.retarget(dir.path().join("absent.h5")).is_err());
        assert!(!c.is_open());
        assert!(matches!(c.insert(&[true], "flag"), Err(Error::Closed)));
    }

    #[test]
    fn manual_flush_policy_defers_writes() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ContainerOptions::new().flush_policy(FlushPolicy::Manual);
        let mut c = Container::create_with(dir.path().join("m"), opts).unwrap();
        let path = c.path().unwrap().to_path_buf();
        let empty = std::fs::read(&path).unwrap();
        c.insert(&[1usize, 2], "sizes").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), empty);
        c.flush().unwrap();
        assert_ne!(std::fs::read(&path).unwrap(), empty);
    }
}
