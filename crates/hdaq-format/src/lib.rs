//! Pure-Rust HDF5 encoding and decoding for growable chunked datasets.
//!
//! This crate covers the subset of the HDF5 file format needed to store
//! append-only numeric datasets: v3 superblocks, v2 object headers with
//! compact links and attributes, and chunked datasets with one unlimited
//! dimension indexed by an extensible array.
//!
//! [`FileImage`] is the entry point: an in-memory tree of groups and
//! datasets that is edited in place and converted to and from file bytes.
//! A [`FileLayout`] remembers where a written file put everything, so
//! [`FileImage::append_patches`] can turn later appends into a few
//! [`Patch`]es instead of a whole new file.

pub mod attribute;
pub mod bytes;
pub mod checksum;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod extensible_array;
pub mod file_image;
pub mod file_layout;
pub mod file_reader;
pub mod file_writer;
pub mod link_message;
pub mod message_type;
pub mod object_header;
pub mod selection;
pub mod superblock;

pub use error::FormatError;
pub use file_image::{Dataset, FileImage, Group, Node};
pub use file_layout::{FileLayout, Patch};
