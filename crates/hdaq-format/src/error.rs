//! Error types for HDF5 encoding, decoding and in-memory object edits.

use core::fmt;

/// Errors raised while encoding, decoding or editing a container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The HDF5 magic signature was not found at any valid offset.
    SignatureNotFound,
    /// The superblock version is not supported.
    UnsupportedVersion(u8),
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    InvalidLengthSize(u8),
    /// A metadata block did not start with the expected four-byte signature.
    InvalidSignature {
        /// The signature the block should carry.
        expected: &'static str,
    },
    /// Invalid object header version.
    InvalidObjectHeaderVersion(u8),
    /// Unknown message type that is marked as must-understand.
    UnsupportedMessage(u16),
    /// Jenkins lookup3 checksum mismatch.
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Datatype class outside fixed-point and floating-point.
    UnsupportedDatatypeClass(u8),
    /// Invalid dataspace message version.
    InvalidDataspaceVersion(u8),
    /// Invalid dataspace type byte.
    InvalidDataspaceType(u8),
    /// Invalid data layout message version.
    InvalidLayoutVersion(u8),
    /// Layout or chunk index that this crate does not handle.
    UnsupportedLayout(&'static str),
    /// Invalid link message version.
    InvalidLinkVersion(u8),
    /// Soft, external or otherwise non-hard link.
    UnsupportedLink(u8),
    /// Invalid attribute message version.
    InvalidAttributeVersion(u8),
    /// Group storage this crate does not handle (dense links, symbol tables).
    UnsupportedGroupStorage,
    /// An object reachable through more than one link.
    DuplicateObject(u64),
    /// A path is empty where a name is needed or contains an empty component.
    InvalidPath(String),
    /// No object exists at the path.
    PathNotFound(String),
    /// The object at the path is not a group.
    NotAGroup(String),
    /// The object at the path is not a dataset.
    NotADataset(String),
    /// An object already exists at the path.
    AlreadyExists(String),
    /// An attribute with the same name is already attached.
    AttributeExists {
        /// Path of the object carrying the attribute.
        object: String,
        /// Attribute name.
        name: String,
    },
    /// No attribute with this name is attached.
    AttributeNotFound {
        /// Path of the object searched.
        object: String,
        /// Attribute name.
        name: String,
    },
    /// Selection or shape rank differs from the dataspace rank.
    RankMismatch {
        /// Rank of the dataspace.
        expected: usize,
        /// Rank supplied.
        actual: usize,
    },
    /// A selection reaches outside the current extent.
    SelectionOutOfBounds {
        /// Offending dimension.
        dim: usize,
        /// One past the last selected index.
        end: u64,
        /// Current extent of the dimension.
        extent: u64,
    },
    /// Hyperslab blocks overlap or have a zero stride or block.
    InvalidHyperslab,
    /// Buffer length does not match the selected element count.
    DataSizeMismatch {
        /// Bytes required.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// A requested extent is larger than the maximum dimension.
    ExtentExceedsMax {
        /// Offending dimension.
        dim: usize,
        /// Requested size.
        requested: u64,
        /// Maximum size.
        max: u64,
    },
    /// Invalid dataset shape for a chunked, extensible dataset.
    InvalidShape(&'static str),
    /// The extensible array chunk index cannot address more chunks.
    ChunkIndexFull {
        /// Number of chunks the index can hold.
        capacity: u64,
    },
    /// A header message does not fit the 16-bit message size field.
    MessageTooLarge(usize),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::SignatureNotFound => {
                write!(f, "HDF5 signature not found at any valid offset")
            }
            FormatError::UnsupportedVersion(v) => {
                write!(f, "unsupported superblock version: {v}")
            }
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidSignature { expected } => {
                write!(f, "invalid block signature, expected {expected}")
            }
            FormatError::InvalidObjectHeaderVersion(v) => {
                write!(f, "invalid object header version: {v}")
            }
            FormatError::UnsupportedMessage(id) => {
                write!(
                    f,
                    "unsupported message type {id:#06x} marked as must-understand"
                )
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::UnsupportedDatatypeClass(c) => {
                write!(f, "unsupported datatype class: {c}")
            }
            FormatError::InvalidDataspaceVersion(v) => {
                write!(f, "invalid dataspace version: {v}")
            }
            FormatError::InvalidDataspaceType(t) => write!(f, "invalid dataspace type: {t}"),
            FormatError::InvalidLayoutVersion(v) => write!(f, "invalid layout version: {v}"),
            FormatError::UnsupportedLayout(what) => write!(f, "unsupported layout: {what}"),
            FormatError::InvalidLinkVersion(v) => write!(f, "invalid link version: {v}"),
            FormatError::UnsupportedLink(t) => write!(f, "unsupported link type: {t}"),
            FormatError::InvalidAttributeVersion(v) => {
                write!(f, "invalid attribute version: {v}")
            }
            FormatError::UnsupportedGroupStorage => {
                write!(f, "only compact link storage is supported")
            }
            FormatError::DuplicateObject(addr) => {
                write!(f, "object at address {addr:#x} is linked more than once")
            }
            FormatError::InvalidPath(p) => write!(f, "invalid object path: {p:?}"),
            FormatError::PathNotFound(p) => write!(f, "no object at {p}"),
            FormatError::NotAGroup(p) => write!(f, "not a group: {p}"),
            FormatError::NotADataset(p) => write!(f, "not a dataset: {p}"),
            FormatError::AlreadyExists(p) => write!(f, "object already exists: {p}"),
            FormatError::AttributeExists { object, name } => {
                write!(f, "attribute {name:?} already exists on {object}")
            }
            FormatError::AttributeNotFound { object, name } => {
                write!(f, "attribute {name:?} not found on {object}")
            }
            FormatError::RankMismatch { expected, actual } => {
                write!(f, "rank mismatch: expected {expected}, got {actual}")
            }
            FormatError::SelectionOutOfBounds { dim, end, extent } => {
                write!(
                    f,
                    "selection ends at {end} in dimension {dim}, extent is {extent}"
                )
            }
            FormatError::InvalidHyperslab => write!(f, "invalid hyperslab parameters"),
            FormatError::DataSizeMismatch { expected, actual } => {
                write!(f, "data size mismatch: need {expected} bytes, got {actual}")
            }
            FormatError::ExtentExceedsMax {
                dim,
                requested,
                max,
            } => {
                write!(
                    f,
                    "extent {requested} exceeds maximum {max} in dimension {dim}"
                )
            }
            FormatError::InvalidShape(why) => write!(f, "invalid dataset shape: {why}"),
            FormatError::ChunkIndexFull { capacity } => {
                write!(f, "chunk index full: at most {capacity} chunks")
            }
            FormatError::MessageTooLarge(n) => {
                write!(f, "header message of {n} bytes exceeds 65535")
            }
        }
    }
}

impl std::error::Error for FormatError {}
