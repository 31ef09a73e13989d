//! Boxes of array indices.
//!
//! An [`ArraySubset`] is a half-open box: a start index and a shape per dimension. Read and write regions, chunk extents and array bounds are all boxes.

use std::fmt::Display;
use std::ops::Range;

use itertools::izip;
use thiserror::Error;

use crate::{ArrayIndices, ArrayShape};

/// An array subset error.
#[derive(Clone, Debug, Error)]
pub enum ArraySubsetError {
    /// The dimensionality of an argument does not match the box.
    #[error("incompatible dimensionality {got}, expected {expected}")]
    IncompatibleDimensionality {
        /// The dimensionality encountered.
        got: usize,
        /// The expected dimensionality.
        expected: usize,
    },
    /// `start` and `shape` have different lengths.
    #[error("incompatible start {start:?} with shape {shape:?}")]
    IncompatibleStartShape {
        /// The start.
        start: ArrayIndices,
        /// The shape.
        shape: ArrayShape,
    },
    /// The offset lies beyond the start of the box in some dimension.
    #[error("incompatible offset {offset:?} for region with start {start:?}")]
    IncompatibleOffset {
        /// The start of the region.
        start: ArrayIndices,
        /// The offset.
        offset: ArrayIndices,
    },
}

/// A box of array indices.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ArraySubset {
    start: ArrayIndices,
    shape: ArrayShape,
}

impl Display for ArraySubset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_ranges())
    }
}

impl ArraySubset {
    /// A box spanning `ranges`, one per dimension.
    #[must_use]
    pub fn new_with_ranges(ranges: &[Range<u64>]) -> Self {
        let (start, shape) = ranges
            .iter()
            .map(|range| (range.start, range.end.saturating_sub(range.start)))
            .unzip();
        Self { start, shape }
    }

    /// Create a new array subset with `shape` starting at the origin.
    #[must_use]
    pub fn new_with_shape(shape: ArrayShape) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// A box at `start` with `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`ArraySubsetError`] if the size of `start` and `shape` do not match.
    pub fn new_with_start_shape(
        start: ArrayIndices,
        shape: ArrayShape,
    ) -> Result<Self, ArraySubsetError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(ArraySubsetError::IncompatibleStartShape { start, shape })
        }
    }

    /// The inclusive lower bound of each dimension.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// The extent of each dimension.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The exclusive upper bound of each dimension, saturating at [`u64::MAX`].
    #[must_use]
    pub fn end_exc(&self) -> ArrayIndices {
        std::iter::zip(&self.start, &self.shape)
            .map(|(&start, &size)| start.saturating_add(size))
            .collect()
    }

    /// Return the array subset as a list of ranges, saturating at [`u64::MAX`].
    #[must_use]
    pub fn to_ranges(&self) -> Vec<Range<u64>> {
        std::iter::zip(&self.start, &self.shape)
            .map(|(&start, &size)| start..start.saturating_add(size))
            .collect()
    }

    /// True if any dimension has zero extent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.contains(&0)
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// The number of indices in the box.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Returns true if the array subset is within the bounds of an array of `array_shape` anchored at the origin.
    ///
    /// A subset whose end is not representable is out of bounds.
    #[must_use]
    pub fn inbounds_shape(&self, array_shape: &[u64]) -> bool {
        self.dimensionality() == array_shape.len()
            && izip!(&self.start, &self.shape, array_shape).all(|(&start, &size, &bound)| {
                start.checked_add(size).is_some_and(|end| end <= bound)
            })
    }

    /// The intersection with `subset_other`, empty if the boxes are disjoint.
    ///
    /// # Errors
    ///
    /// Returns [`ArraySubsetError`] if the dimensionality of `subset_other` does not match.
    pub fn overlap(&self, subset_other: &Self) -> Result<Self, ArraySubsetError> {
        if subset_other.dimensionality() != self.dimensionality() {
            return Err(ArraySubsetError::IncompatibleDimensionality {
                got: subset_other.dimensionality(),
                expected: self.dimensionality(),
            });
        }
        let ranges: Vec<Range<u64>> = izip!(self.to_ranges(), subset_other.to_ranges())
            .map(|(a, b)| {
                let start = a.start.max(b.start);
                let end = a.end.min(b.end).max(start);
                start..end
            })
            .collect();
        Ok(Self::new_with_ranges(&ranges))
    }

    /// The box translated so that `offset` becomes the origin.
    ///
    /// # Errors
    ///
    /// Returns [`ArraySubsetError`] if `offset` does not match the dimensionality or exceeds the start.
    pub fn relative_to(&self, offset: &[u64]) -> Result<Self, ArraySubsetError> {
        if offset.len() != self.dimensionality()
            || std::iter::zip(&self.start, offset).any(|(&start, &offset)| offset > start)
        {
            return Err(ArraySubsetError::IncompatibleOffset {
                start: self.start.clone(),
                offset: offset.to_vec(),
            });
        }
        Ok(Self {
            start: std::iter::zip(&self.start, offset)
                .map(|(&start, &offset)| start - offset)
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Returns an iterator over the indices of elements within the subset in C order.
    #[must_use]
    pub fn indices(&self) -> Indices {
        Indices::new(self.clone())
    }

    /// Return the subset of the chunk grid (of chunks with `chunk_shape`) that intersects this subset.
    ///
    /// # Errors
    ///
    /// Returns [`ArraySubsetError`] if `chunk_shape` does not match the dimensionality.
    pub fn chunks(&self, chunk_shape: &[u64]) -> Result<Self, ArraySubsetError> {
        if chunk_shape.len() != self.dimensionality() {
            return Err(ArraySubsetError::IncompatibleDimensionality {
                got: chunk_shape.len(),
                expected: self.dimensionality(),
            });
        }
        if self.is_empty() {
            return Ok(Self::new_with_shape(vec![0; self.dimensionality()]));
        }
        let ranges: Vec<Range<u64>> = izip!(&self.start, &self.shape, chunk_shape)
            .map(|(&start, &size, &chunk)| {
                start / chunk..start.saturating_add(size).div_ceil(chunk)
            })
            .collect();
        Ok(Self::new_with_ranges(&ranges))
    }
}

/// An iterator over the indices in an array subset in C order.
#[derive(Clone, Debug)]
pub struct Indices {
    subset: ArraySubset,
    next: Option<ArrayIndices>,
}

impl Indices {
    fn new(subset: ArraySubset) -> Self {
        let next = (!subset.is_empty()).then(|| subset.start.clone());
        Self { subset, next }
    }
}

impl Iterator for Indices {
    type Item = ArrayIndices;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut next = current.clone();
        for dim in (0..next.len()).rev() {
            next[dim] += 1;
            if next[dim] < self.subset.start[dim].saturating_add(self.subset.shape[dim]) {
                self.next = Some(next);
                return Some(current);
            }
            next[dim] = self.subset.start[dim];
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_subset() {
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10, 10]).is_ok());
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10]).is_err());

        let array_subset0 = ArraySubset::new_with_ranges(&[1..5, 2..6]);
        let array_subset1 = ArraySubset::new_with_ranges(&[3..6, 4..7]);
        assert_eq!(
            array_subset0.overlap(&array_subset1).unwrap(),
            ArraySubset::new_with_ranges(&[3..5, 4..6])
        );
        assert!(array_subset0
            .overlap(&ArraySubset::new_with_ranges(&[6..7, 0..1]))
            .unwrap()
            .is_empty());
        assert_eq!(
            array_subset0.relative_to(&[1, 1]).unwrap(),
            ArraySubset::new_with_ranges(&[0..4, 1..5])
        );
        assert!(array_subset0.relative_to(&[1, 1, 1]).is_err());
        assert!(array_subset0.relative_to(&[2, 0]).is_err());
        assert!(array_subset0.inbounds_shape(&[10, 10]));
        assert!(!array_subset0.inbounds_shape(&[2, 2]));
        assert!(!array_subset0.inbounds_shape(&[10, 10, 10]));
        assert_eq!(array_subset0.to_ranges(), vec![1..5, 2..6]);
        assert_eq!(array_subset0.end_exc(), vec![5, 6]);
        assert_eq!(array_subset0.num_elements(), 16);
        assert_eq!(array_subset0.to_string(), "[1..5, 2..6]");
    }

    #[test]
    fn array_subset_end_overflow() {
        let subset = ArraySubset::new_with_start_shape(vec![u64::MAX, 0], vec![2, 1]).unwrap();
        assert!(!subset.inbounds_shape(&[4, 4]));
        assert!(!subset.inbounds_shape(&[u64::MAX, u64::MAX]));
        assert_eq!(subset.end_exc(), vec![u64::MAX, 1]);
        assert_eq!(subset.to_ranges(), vec![u64::MAX..u64::MAX, 0..1]);
        assert_eq!(
            subset.chunks(&[2, 2]).unwrap(),
            ArraySubset::new_with_ranges(&[u64::MAX / 2..u64::MAX.div_ceil(2), 0..1])
        );
    }

    #[test]
    fn array_subset_indices() {
        let subset = ArraySubset::new_with_ranges(&[1..3, 5..7]);
        let indices: Vec<_> = subset.indices().collect();
        assert_eq!(
            indices,
            vec![vec![1, 5], vec![1, 6], vec![2, 5], vec![2, 6]]
        );
        assert_eq!(ArraySubset::new_with_ranges(&[0..0]).indices().count(), 0);
        assert_eq!(ArraySubset::new_with_shape(vec![]).indices().count(), 1);
    }

    #[test]
    fn array_subset_chunks() {
        let subset = ArraySubset::new_with_ranges(&[1..5, 0..2]);
        assert_eq!(
            subset.chunks(&[2, 2]).unwrap(),
            ArraySubset::new_with_ranges(&[0..3, 0..1])
        );
        assert!(subset.chunks(&[2]).is_err());
        assert!(ArraySubset::new_with_ranges(&[2..2, 0..2])
            .chunks(&[2, 2])
            .unwrap()
            .is_empty());
    }
}
