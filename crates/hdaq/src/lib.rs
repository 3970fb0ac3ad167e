//! Append-only data acquisition into growable HDF5 datasets.
//!
//! A [`Container`] owns one HDF5 file. Each call to [`Container::insert`]
//! appends one unit (a fixed-length vector) to a named dataset, creating
//! the dataset on first use. Datasets are stored as `[row_count, units]`
//! with an unlimited second dimension, one unit per chunk. Flushing after
//! an append writes only the new unit and the metadata that points at it;
//! [`Container::compact`] rewrites the whole file.
//!
//! # Recording
//!
//! ```no_run
//! use hdaq::{Attribute, Container};
//!
//! let mut run = Container::create("run")?; // run.h5, or run1.h5 if taken
//! for step in 0..10 {
//!     let t = f64::from(step) * 0.1;
//!     run.insert(&[t, t + 0.25, t + 1.0], "sensors/temp")?;
//! }
//! run.insert_attribute(&Attribute::new("units", vec![1i32, 0, 0]), "sensors/temp")?;
//! run.close()?;
//! # Ok::<(), hdaq::Error>(())
//! ```
//!
//! # Continuing a file
//!
//! ```no_run
//! use hdaq::Container;
//!
//! let mut run = Container::open("run.h5")?;
//! let growth = run.insert(&[9.0, 9.25, 10.0], "sensors/temp")?;
//! println!("{growth} units, first: {:?}", run.read_unit("sensors/temp", 0)?);
//! # Ok::<(), hdaq::Error>(())
//! ```

pub mod attribute;
pub mod config;
pub mod container;
pub mod error;
mod growth;
pub mod name;
pub mod naming;
pub mod registry;
pub mod store;
pub mod types;

pub use attribute::Attribute;
pub use config::{ContainerOptions, FlushPolicy};
pub use container::Container;
pub use error::{Error, Result, StorageError};
pub use name::{resolve, DatasetName};
pub use naming::unique_path;
pub use registry::DatasetHandle;
pub use store::{DatasetMeta, FileStore, Storage};
pub use types::{Element, ElementType, Values};

// Format-level types that appear in the `Storage` signatures.
pub use hdaq_format::datatype::Datatype;
pub use hdaq_format::selection::Selection;
pub use hdaq_format::FormatError;
