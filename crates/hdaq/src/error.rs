//! Error types for the acquisition API.

use std::io;

use hdaq_format::FormatError;

use crate::types::ElementType;

/// Failure reported by the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("HDF5 format error: {0}")]
    Format(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by [`Container`](crate::Container) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("dataset {dataset}: expected {expected} values per unit, got {actual}")]
    ShapeMismatch {
        dataset: String,
        expected: usize,
        actual: usize,
    },

    #[error("dataset {dataset}: stored as {expected}, got {actual} values")]
    TypeMismatch {
        dataset: String,
        expected: ElementType,
        actual: ElementType,
    },

    #[error("dataset {0}: a unit must hold at least one value")]
    EmptyRow(String),

    #[error("dataset already exists: {0}")]
    AlreadyExists(String),

    #[error("container is closed")]
    Closed,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Storage(StorageError::Format(e))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Storage(StorageError::Io(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
