//! Dataset creation and one-unit growth along the unlimited dimension.
//!
//! Every dataset is `[row_count, units]` with chunks of `[row_count, 1]`,
//! so each append lands in a chunk of its own. A failed step undoes the
//! earlier steps of the same call before the error is returned.

use hdaq_format::dataspace::UNLIMITED;
use hdaq_format::selection::Selection;
use hdaq_format::FormatError;
use tracing::{debug, warn};

use crate::error::{Error, Result, StorageError};
use crate::name::DatasetName;
use crate::registry::{DatasetHandle, Registry};
use crate::store::Storage;
use crate::types::{encode, Element, ElementType};

/// One append unit in storage representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Unit {
    pub(crate) element_type: ElementType,
    pub(crate) len: usize,
    pub(crate) raw: Vec<u8>,
}

impl Unit {
    pub(crate) fn encode<T: Element>(values: &[T]) -> Self {
        Self {
            element_type: T::ELEMENT_TYPE,
            len: values.len(),
            raw: encode(values),
        }
    }

    pub(crate) fn zeroed(element_type: ElementType, len: usize) -> Self {
        Self {
            element_type,
            len,
            raw: vec![0; len * element_type.size()],
        }
    }
}

/// Hyperslab covering unit `index` of a `[row_count, _]` dataset.
pub(crate) fn unit_selection(row_count: usize, index: u64) -> Selection {
    Selection::hyperslab(&[0, index], &[row_count as u64, 1])
}

/// Create the dataset `name` holding `unit` as its first unit and register
/// it. The row count is fixed to `unit.len` from here on.
pub(crate) fn create(
    store: &mut dyn Storage,
    registry: &mut Registry,
    name: &DatasetName,
    unit: &Unit,
    create_groups: bool,
) -> Result<()> {
    let path = name.path();
    if unit.len == 0 {
        return Err(Error::EmptyRow(path));
    }
    if create_groups && !name.in_root() {
        store.create_group_all(&name.group)?;
    }

    let rows = unit.len as u64;
    store.create_dataset(
        &path,
        &unit.element_type.native_type(),
        &[rows, 1],
        &[rows, UNLIMITED],
        &[rows, 1],
    )?;
    let written = store
        .write_selection(&path, &unit_selection(unit.len, 0), &unit.raw)
        .and_then(|()| store.commit());
    if let Err(e) = written {
        if let Err(undo) = store.remove(&path) {
            warn!(dataset = %path, error = %undo, "could not remove partially created dataset");
        }
        return Err(e.into());
    }

    debug!(dataset = %path, rows = unit.len, element_type = %unit.element_type, "created dataset");
    registry.insert(
        name.leaf.clone(),
        DatasetHandle {
            path,
            element_type: unit.element_type,
            row_count: unit.len,
            growth: 1,
        },
    );
    Ok(())
}

/// Grow the registered dataset `leaf` by one unit and write `unit` into it.
/// Returns the new growth count.
pub(crate) fn append(
    store: &mut dyn Storage,
    registry: &mut Registry,
    leaf: &str,
    unit: &Unit,
) -> Result<u64> {
    let handle = registry
        .lookup_mut(leaf)
        .ok_or_else(|| Error::NotFound(leaf.to_string()))?;
    if unit.element_type != handle.element_type {
        return Err(Error::TypeMismatch {
            dataset: handle.path.clone(),
            expected: handle.element_type,
            actual: unit.element_type,
        });
    }
    if unit.len != handle.row_count {
        return Err(Error::ShapeMismatch {
            dataset: handle.path.clone(),
            expected: handle.row_count,
            actual: unit.len,
        });
    }

    let extent = store.extent(&handle.path)?;
    let &[rows, units] = extent.as_slice() else {
        return Err(not_a_column_set());
    };
    store.set_extent(&handle.path, &[rows, units + 1])?;
    let written = store
        .write_selection(&handle.path, &unit_selection(unit.len, units), &unit.raw)
        .and_then(|()| store.commit());
    if let Err(e) = written {
        rollback_extent(store, &handle.path, &[rows, units]);
        return Err(e.into());
    }

    handle.growth = units + 1;
    debug!(dataset = %handle.path, growth = handle.growth, "appended unit");
    Ok(handle.growth)
}

fn not_a_column_set() -> Error {
    Error::Storage(StorageError::Format(FormatError::UnsupportedLayout(
        "dataset is not a growable column set",
    )))
}

fn rollback_extent(store: &mut dyn Storage, path: &str, dims: &[u64]) {
    if let Err(undo) = store.set_extent(path, dims) {
        warn!(dataset = %path, error = %undo, "could not restore extent after failed append");
    }
}

/// Describe a dataset found on disk under `name`, `None` if there is none.
pub(crate) fn open_existing(store: &dyn Storage, name: &DatasetName) -> Result<Option<DatasetHandle>> {
    let path = name.path();
    let Some(meta) = store.open_dataset(&path)? else {
        return Ok(None);
    };
    let element_type = ElementType::from_datatype(&meta.datatype).ok_or_else(not_a_column_set)?;
    let (&[rows, units], &[_, UNLIMITED]) = (meta.dims.as_slice(), meta.max_dims.as_slice()) else {
        return Err(not_a_column_set());
    };

    debug!(dataset = %path, rows, growth = units, "found existing dataset");
    Ok(Some(DatasetHandle {
        path,
        element_type,
        row_count: rows as usize,
        growth: units,
    }))
}
