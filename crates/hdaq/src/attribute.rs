//! Fixed-size metadata vectors attached to datasets.

use tracing::{debug, warn};

use crate::error::Result;
use crate::growth::Unit;
use crate::store::Storage;
use crate::types::Element;

/// A named metadata vector, written once.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute<T> {
    pub name: String,
    pub values: Vec<T>,
}

impl<T: Element> Attribute<T> {
    pub fn new(name: impl Into<String>, values: impl Into<Vec<T>>) -> Self {
        Self {
            name: name.into(),
            values: values.into(),
        }
    }
}

/// Attach `name` to the dataset at `path`. The dataset must exist.
pub(crate) fn write(store: &mut dyn Storage, path: &str, name: &str, unit: &Unit) -> Result<()> {
    store.create_attribute(path, name, &unit.element_type.native_type(), &unit.raw)?;
    if let Err(e) = store.commit() {
        if let Err(undo) = store.remove_attribute(path, name) {
            warn!(dataset = %path, attribute = name, error = %undo, "could not remove unsaved attribute");
        }
        return Err(e.into());
    }
    debug!(dataset = %path, attribute = name, len = unit.len, "wrote attribute");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushPolicy;
    use crate::error::{Error, StorageError};
    use crate::store::FileStore;
    use crate::types::ElementType;
    use hdaq_format::dataspace::UNLIMITED;
    use hdaq_format::FormatError;

    fn store_with_dataset(dir: &tempfile::TempDir) -> FileStore {
        let mut store = FileStore::create(dir.path().join("a.h5"), FlushPolicy::Manual).unwrap();
        store
            .create_dataset(
                "/d",
                &ElementType::Float64.native_type(),
                &[3, 1],
                &[3, UNLIMITED],
                &[3, 1],
            )
            .unwrap();
        store
    }

    #[test]
    fn written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_with_dataset(&dir);
        let units = Attribute::new("units", vec![1i32, 0, 0]);
        write(&mut store, "/d", &units.name, &Unit::encode(&units.values)).unwrap();

        let (dt, raw) = store.read_attribute("/d", "units").unwrap();
        assert_eq!(dt, ElementType::Int32.native_type());
        assert_eq!(raw.len(), 12);

        let again = write(&mut store, "/d", "units", &Unit::encode(&[9i32]));
        assert!(matches!(
            again,
            Err(Error::Storage(StorageError::Format(FormatError::AttributeExists { .. })))
        ));
        assert_eq!(store.read_attribute("/d", "units").unwrap().1, raw);
    }

    #[test]
    fn length_independent_of_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_with_dataset(&dir);
        write(&mut store, "/d", "gain", &Unit::encode(&[0.5f32])).unwrap();
        let (dt, raw) = store.read_attribute("/d", "gain").unwrap();
        assert_eq!(dt, ElementType::Float32.native_type());
        assert_eq!(raw, 0.5f32.to_le_bytes().to_vec());
    }
}
