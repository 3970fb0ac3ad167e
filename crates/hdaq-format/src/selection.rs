//! Hyperslab selections for partial dataset I/O.
//!
//! A [`Selection`] describes which elements of a dataset to read or write.
//! Selected elements are visited in row-major order of the selection's
//! output shape, which is also the order of the caller's buffer.
//!
//! # Example
//!
//! ```
//! use hdaq_format::selection::Selection;
//!
//! // rows 0..3 of column 5
//! let sel = Selection::slice(&[0..3, 5..6]);
//! assert_eq!(sel.num_elements(&[3, 10]), 3);
//! assert_eq!(sel.output_shape(&[3, 10]), vec![3, 1]);
//! ```

use core::ops::Range;

use crate::error::FormatError;

/// A selection describing which elements of a dataset to access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The entire current extent.
    All,

    /// A regular hyperslab. For each dimension `d`, `count[d]` blocks of
    /// `block[d]` consecutive elements start at `start[d]`, spaced
    /// `stride[d]` apart.
    Hyperslab {
        start: Vec<u64>,
        stride: Vec<u64>,
        count: Vec<u64>,
        block: Vec<u64>,
    },
}

impl Selection {
    /// Contiguous hyperslab from one range per dimension.
    pub fn slice(ranges: &[Range<u64>]) -> Self {
        Self::hyperslab(
            &ranges.iter().map(|r| r.start).collect::<Vec<_>>(),
            &ranges
                .iter()
                .map(|r| r.end.saturating_sub(r.start))
                .collect::<Vec<_>>(),
        )
    }

    /// Contiguous hyperslab of `count` elements per dimension starting at
    /// `start`.
    pub fn hyperslab(start: &[u64], count: &[u64]) -> Self {
        let rank = start.len();
        Selection::Hyperslab {
            start: start.to_vec(),
            stride: vec![1; rank],
            count: count.to_vec(),
            block: vec![1; rank],
        }
    }

    /// Number of selected elements for a dataspace of shape `dims`.
    pub fn num_elements(&self, dims: &[u64]) -> u64 {
        self.output_shape(dims).iter().product()
    }

    /// Rank of the selection, `None` for [`Selection::All`].
    pub fn rank(&self) -> Option<usize> {
        match self {
            Selection::All => None,
            Selection::Hyperslab { start, .. } => Some(start.len()),
        }
    }

    /// Shape of the selected region: `count[d] * block[d]` per dimension.
    pub fn output_shape(&self, dims: &[u64]) -> Vec<u64> {
        match self {
            Selection::All => dims.to_vec(),
            Selection::Hyperslab { count, block, .. } => {
                count.iter().zip(block).map(|(&c, &b)| c * b).collect()
            }
        }
    }

    /// Check the selection against the current extent `dims`.
    pub fn validate(&self, dims: &[u64]) -> Result<(), FormatError> {
        let Selection::Hyperslab {
            start,
            stride,
            count,
            block,
        } = self
        else {
            return Ok(());
        };
        let rank = dims.len();
        for v in [start, stride, count, block] {
            if v.len() != rank {
                return Err(FormatError::RankMismatch {
                    expected: rank,
                    actual: v.len(),
                });
            }
        }
        for d in 0..rank {
            if stride[d] == 0 || block[d] == 0 {
                return Err(FormatError::InvalidHyperslab);
            }
            if count[d] > 1 && stride[d] < block[d] {
                return Err(FormatError::InvalidHyperslab);
            }
            if count[d] == 0 {
                continue;
            }
            let end = (count[d] - 1)
                .checked_mul(stride[d])
                .and_then(|v| v.checked_add(start[d]))
                .and_then(|v| v.checked_add(block[d]))
                .ok_or(FormatError::InvalidHyperslab)?;
            if end > dims[d] {
                return Err(FormatError::SelectionOutOfBounds {
                    dim: d,
                    end,
                    extent: dims[d],
                });
            }
        }
        Ok(())
    }

    /// Dataset coordinates of every selected element, in row-major order
    /// of the output shape. The selection must already be validated.
    pub fn coordinates(&self, dims: &[u64]) -> Coordinates {
        let shape = self.output_shape(dims);
        let per_dim = match self {
            Selection::All => dims.iter().map(|_| (0, 1, 1)).collect(),
            Selection::Hyperslab {
                start,
                stride,
                block,
                ..
            } => start
                .iter()
                .zip(stride)
                .zip(block)
                .map(|((&s, &st), &b)| (s, st, b))
                .collect(),
        };
        let done = shape.iter().any(|&n| n == 0);
        Coordinates {
            per_dim,
            position: vec![0; shape.len()],
            shape,
            done,
        }
    }
}

/// Iterator over the coordinates of a selection. See
/// [`Selection::coordinates`].
#[derive(Debug, Clone)]
pub struct Coordinates {
    /// (start, stride, block) per dimension.
    per_dim: Vec<(u64, u64, u64)>,
    shape: Vec<u64>,
    position: Vec<u64>,
    done: bool,
}

impl Iterator for Coordinates {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Vec<u64>> {
        if self.done {
            return None;
        }
        let coord = self
            .position
            .iter()
            .zip(&self.per_dim)
            .map(|(&p, &(start, stride, block))| start + (p / block) * stride + p % block)
            .collect();

        // odometer increment, last dimension fastest
        self.done = true;
        for d in (0..self.shape.len()).rev() {
            self.position[d] += 1;
            if self.position[d] < self.shape[d] {
                self.done = false;
                break;
            }
            self.position[d] = 0;
        }
        Some(coord)
    }
}
