//! HDF5 Dataspace message (type 0x0001).

use crate::bytes::{self, Reader};
use crate::error::FormatError;

/// Maximum dimension value meaning "unlimited".
pub const UNLIMITED: u64 = u64::MAX;

/// Type of dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// Single element.
    Scalar,
    /// N-dimensional array.
    Simple,
    /// No data.
    Null,
}

/// Parsed dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    /// Current dimension sizes.
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes, if present. [`UNLIMITED`] marks an
    /// unbounded dimension.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    /// Simple dataspace with fixed dimensions.
    pub fn simple(dims: &[u64]) -> Self {
        Self {
            space_type: DataspaceType::Simple,
            dimensions: dims.to_vec(),
            max_dimensions: None,
        }
    }

    /// Simple dataspace with explicit maximum dimensions.
    pub fn extensible(dims: &[u64], max_dims: &[u64]) -> Self {
        Self {
            space_type: DataspaceType::Simple,
            dimensions: dims.to_vec(),
            max_dimensions: Some(max_dims.to_vec()),
        }
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Maximum dimensions, defaulting to the current ones.
    pub fn max_dims(&self) -> Vec<u64> {
        self.max_dimensions
            .clone()
            .unwrap_or_else(|| self.dimensions.clone())
    }

    /// Total number of elements. Scalar = 1, Null = 0.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self.dimensions.iter().product(),
        }
    }

    /// Parse a version 1 or 2 dataspace message.
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        let mut r = Reader::new(data);
        let version = r.u8()?;
        let rank = r.u8()? as usize;
        let flags = r.u8()?;
        let space_type = match version {
            1 => {
                // reserved(1) + reserved(4)
                r.skip(5)?;
                if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                }
            }
            2 => match r.u8()? {
                0 => DataspaceType::Scalar,
                1 => DataspaceType::Simple,
                2 => DataspaceType::Null,
                other => return Err(FormatError::InvalidDataspaceType(other)),
            },
            other => return Err(FormatError::InvalidDataspaceVersion(other)),
        };

        let ls = length_size as usize;
        let dimensions = (0..rank)
            .map(|_| r.uint(ls))
            .collect::<Result<Vec<_>, _>>()?;
        let max_dimensions = if flags & 0x01 != 0 {
            Some(
                (0..rank)
                    .map(|_| r.uint(ls).map(|v| widen_unlimited(v, ls)))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            None
        };

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    /// Serialize as a version 2 dataspace message.
    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let ls = length_size as usize;
        let mut buf = Vec::with_capacity(4 + 2 * self.rank() * ls);
        buf.push(2);
        buf.push(self.rank() as u8);
        buf.push(if self.max_dimensions.is_some() { 0x01 } else { 0x00 });
        buf.push(match self.space_type {
            DataspaceType::Scalar => 0,
            DataspaceType::Simple => 1,
            DataspaceType::Null => 2,
        });
        for &dim in &self.dimensions {
            bytes::put_uint(&mut buf, dim, ls);
        }
        if let Some(max_dims) = &self.max_dimensions {
            for &dim in max_dims {
                bytes::put_uint(&mut buf, dim, ls);
            }
        }
        buf
    }
}

/// An all-ones value of a narrower length field still means unlimited.
fn widen_unlimited(value: u64, length_size: usize) -> u64 {
    if length_size < 8 && value == (1u64 << (length_size * 8)) - 1 {
        UNLIMITED
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensible_roundtrip() {
        let ds = Dataspace::extensible(&[3, 1], &[3, UNLIMITED]);
        let bytes = ds.serialize(8);
        assert_eq!(bytes.len(), 4 + 4 * 8);
        assert_eq!(bytes[2], 0x01);
        let parsed = Dataspace::parse(&bytes, 8).unwrap();
        assert_eq!(parsed, ds);
        assert_eq!(parsed.num_elements(), 3);
    }

    #[test]
    fn simple_has_no_max_dims() {
        let ds = Dataspace::simple(&[4, 5]);
        let parsed = Dataspace::parse(&ds.serialize(8), 8).unwrap();
        assert_eq!(parsed.max_dimensions, None);
        assert_eq!(parsed.max_dims(), vec![4, 5]);
        assert_eq!(parsed.num_elements(), 20);
    }

    #[test]
    fn version1_layout() {
        let mut buf = vec![1, 1, 0x01, 0, 0, 0, 0, 0];
        buf.extend_from_slice(&7u64.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        let ds = Dataspace::parse(&buf, 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Simple);
        assert_eq!(ds.dimensions, vec![7]);
        assert_eq!(ds.max_dimensions, Some(vec![UNLIMITED]));
    }

    #[test]
    fn four_byte_unlimited_widens() {
        let mut buf = vec![2, 1, 0x01, 1];
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let ds = Dataspace::parse(&buf, 4).unwrap();
        assert_eq!(ds.max_dimensions, Some(vec![UNLIMITED]));
    }

    #[test]
    fn scalar_and_null() {
        let scalar = Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: vec![],
            max_dimensions: None,
        };
        assert_eq!(scalar.num_elements(), 1);
        let parsed = Dataspace::parse(&scalar.serialize(8), 8).unwrap();
        assert_eq!(parsed.space_type, DataspaceType::Scalar);

        let null = Dataspace::parse(&[2, 0, 0, 2], 8).unwrap();
        assert_eq!(null.num_elements(), 0);
    }

    #[test]
    fn bad_version_and_type() {
        assert_eq!(
            Dataspace::parse(&[9, 0, 0, 0], 8),
            Err(FormatError::InvalidDataspaceVersion(9))
        );
        assert_eq!(
            Dataspace::parse(&[2, 0, 0, 7], 8),
            Err(FormatError::InvalidDataspaceType(7))
        );
    }
}
