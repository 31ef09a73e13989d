//! Element arrays.

use bytes::Bytes;
use chunkstore_data_type::{DataType, Element, ElementError};
use thiserror::Error;

use crate::{ArrayShape, ArraySubset};

/// An array error.
#[derive(Clone, Debug, Error)]
pub enum ArrayError {
    /// The number of bytes does not match the shape.
    #[error("expected {expected} bytes for shape {shape:?} of {data_type}, got {actual}")]
    InvalidBytesLength {
        /// The data type.
        data_type: DataType,
        /// The shape.
        shape: ArrayShape,
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        actual: usize,
    },
    /// The array is too large to address.
    #[error("array of shape {0:?} is too large")]
    TooLarge(ArrayShape),
    /// A broadcast to a rank below the array rank.
    #[error("cannot broadcast array of rank {array_rank} to rank {target_rank}")]
    IncompatibleRank {
        /// The rank of the array.
        array_rank: usize,
        /// The requested rank.
        target_rank: usize,
    },
    /// A broadcast to a shape whose trailing dimensions do not match.
    #[error("cannot broadcast array of shape {array_shape:?} to shape {target_shape:?}")]
    IncompatibleShape {
        /// The shape of the array.
        array_shape: ArrayShape,
        /// The requested shape.
        target_shape: ArrayShape,
    },
    /// An element error.
    #[error(transparent)]
    Element(#[from] ElementError),
}

fn num_bytes(data_type: DataType, shape: &[u64]) -> Result<usize, ArrayError> {
    shape
        .iter()
        .try_fold(1u64, |acc, &size| acc.checked_mul(size))
        .and_then(|elements| usize::try_from(elements).ok())
        .and_then(|elements| elements.checked_mul(data_type.size()))
        .ok_or_else(|| ArrayError::TooLarge(shape.to_vec()))
}

/// A dense array of elements in C order and native byte order.
///
/// Cloning is cheap; the element bytes are shared.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SharedArray {
    data_type: DataType,
    shape: ArrayShape,
    bytes: Bytes,
}

impl SharedArray {
    /// Create an array from raw native-endian element bytes.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidBytesLength`] if `bytes` does not match `shape`.
    pub fn new(
        data_type: DataType,
        shape: ArrayShape,
        bytes: impl Into<Bytes>,
    ) -> Result<Self, ArrayError> {
        let bytes = bytes.into();
        let expected = num_bytes(data_type, &shape)?;
        if bytes.len() == expected {
            Ok(Self {
                data_type,
                shape,
                bytes,
            })
        } else {
            Err(ArrayError::InvalidBytesLength {
                data_type,
                shape,
                expected,
                actual: bytes.len(),
            })
        }
    }

    /// Create an array of zero (default) elements.
    ///
    /// # Errors
    /// Returns [`ArrayError::TooLarge`] if the array is too large to address.
    pub fn new_zeroed(data_type: DataType, shape: ArrayShape) -> Result<Self, ArrayError> {
        let bytes = vec![0u8; num_bytes(data_type, &shape)?];
        Ok(Self {
            data_type,
            shape,
            bytes: bytes.into(),
        })
    }

    /// Create an array from elements.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if the number of elements does not match `shape`.
    pub fn from_elements<T: Element>(shape: ArrayShape, elements: &[T]) -> Result<Self, ArrayError> {
        Self::new(T::DATA_TYPE, shape, T::to_bytes(elements))
    }

    /// Convert the array to elements.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if `T` does not match the data type of the array.
    pub fn to_elements<T: Element>(&self) -> Result<Vec<T>, ArrayError> {
        T::validate_data_type(self.data_type)?;
        Ok(T::from_bytes(&self.bytes)?)
    }

    /// The data type of the elements.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The shape of the array.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The element bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The element bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// The number of elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// An array broadcast across leading dimensions with zero stride.
///
/// The trailing dimensions hold the elements of `inner`; every position of the leading dimensions views the same elements.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BroadcastArray {
    shape: ArrayShape,
    inner: SharedArray,
}

impl BroadcastArray {
    /// Broadcast `inner` to `shape`.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if `shape` has lower rank than `inner` or its trailing dimensions differ from the shape of `inner`.
    pub fn new(inner: SharedArray, shape: ArrayShape) -> Result<Self, ArrayError> {
        if shape.len() < inner.rank() {
            return Err(ArrayError::IncompatibleRank {
                array_rank: inner.rank(),
                target_rank: shape.len(),
            });
        }
        if shape[shape.len() - inner.rank()..] != *inner.shape() {
            return Err(ArrayError::IncompatibleShape {
                array_shape: inner.shape().to_vec(),
                target_shape: shape,
            });
        }
        Ok(Self { shape, inner })
    }

    /// The broadcast shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The data type of the elements.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.inner.data_type()
    }

    /// The array that is repeated.
    #[must_use]
    pub const fn inner(&self) -> &SharedArray {
        &self.inner
    }

    /// The stride in bytes of each dimension. Leading (broadcast) dimensions have a stride of zero.
    #[must_use]
    pub fn byte_strides(&self) -> Vec<usize> {
        let leading = self.shape.len() - self.inner.rank();
        let mut strides = vec![0usize; self.shape.len()];
        let mut stride = self.inner.data_type().size();
        for dim in (leading..self.shape.len()).rev() {
            strides[dim] = stride;
            stride *= usize::try_from(self.shape[dim]).unwrap_or(usize::MAX);
        }
        strides
    }

    /// Broadcast the inner array to `rank` dimensions, where each added leading dimension has extent 1.
    ///
    /// # Errors
    /// Returns [`ArrayError::IncompatibleRank`] if `rank` is less than the rank of the inner array.
    pub fn broadcast_to_rank(&self, rank: usize) -> Result<Self, ArrayError> {
        if rank < self.inner.rank() {
            return Err(ArrayError::IncompatibleRank {
                array_rank: self.inner.rank(),
                target_rank: rank,
            });
        }
        let mut shape = vec![1; rank - self.inner.rank()];
        shape.extend_from_slice(self.inner.shape());
        Self::new(self.inner.clone(), shape)
    }

    /// Write out every element of the broadcast array.
    ///
    /// # Errors
    /// Returns [`ArrayError::TooLarge`] if the array is too large to address.
    pub fn materialize(&self) -> Result<SharedArray, ArrayError> {
        let total = num_bytes(self.data_type(), &self.shape)?;
        let pattern = self.inner.as_bytes();
        let bytes = if pattern.is_empty() {
            Vec::new()
        } else {
            pattern.repeat(total / pattern.len())
        };
        SharedArray::new(self.data_type(), self.shape.clone(), bytes)
    }
}

/// Copy a region of `copy_shape` elements between two dense C-order buffers.
///
/// Elements are `element_size` bytes.
/// The region starts at `src_start` within an array of `src_shape`, and at `dst_start` within an array of `dst_shape`.
/// All inputs must have equal dimensionality and the region must lie within both arrays.
///
/// # Panics
/// Panics if the region is out of bounds of either buffer.
#[allow(clippy::too_many_arguments)]
pub fn copy_region(
    src: &[u8],
    src_shape: &[u64],
    src_start: &[u64],
    dst: &mut [u8],
    dst_shape: &[u64],
    dst_start: &[u64],
    copy_shape: &[u64],
    element_size: usize,
) {
    #[allow(clippy::cast_possible_truncation)]
    fn linear_offset(shape: &[u64], indices: &[u64]) -> usize {
        std::iter::zip(shape, indices).fold(0u64, |acc, (&size, &index)| acc * size + index)
            as usize
    }

    if copy_shape.contains(&0) {
        return;
    }
    let rank = copy_shape.len();
    if rank == 0 {
        dst[..element_size].copy_from_slice(&src[..element_size]);
        return;
    }
    #[allow(clippy::cast_possible_truncation)]
    let run = copy_shape[rank - 1] as usize * element_size;
    let outer = ArraySubset::new_with_shape(copy_shape[..rank - 1].to_vec());
    let mut src_indices = src_start.to_vec();
    let mut dst_indices = dst_start.to_vec();
    for indices in outer.indices() {
        for (dim, index) in indices.iter().enumerate() {
            src_indices[dim] = src_start[dim] + index;
            dst_indices[dim] = dst_start[dim] + index;
        }
        let src_offset = linear_offset(src_shape, &src_indices) * element_size;
        let dst_offset = linear_offset(dst_shape, &dst_indices) * element_size;
        dst[dst_offset..dst_offset + run].copy_from_slice(&src[src_offset..src_offset + run]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_array() {
        let array = SharedArray::from_elements(vec![2, 2], &[1i32, 2, 3, 4]).unwrap();
        assert_eq!(array.data_type(), DataType::Int32);
        assert_eq!(array.num_elements(), 4);
        assert_eq!(array.to_elements::<i32>().unwrap(), vec![1, 2, 3, 4]);
        assert!(array.to_elements::<u32>().is_err());
        assert!(SharedArray::from_elements(vec![3], &[1i32, 2]).is_err());
        assert_eq!(
            SharedArray::new_zeroed(DataType::UInt16, vec![3])
                .unwrap()
                .to_elements::<u16>()
                .unwrap(),
            vec![0, 0, 0]
        );
    }

    #[test]
    fn broadcast_array() {
        let inner = SharedArray::from_elements(vec![2], &[7u8, 9]).unwrap();
        let broadcast = BroadcastArray::new(inner.clone(), vec![3, 2]).unwrap();
        assert_eq!(broadcast.byte_strides(), vec![0, 1]);
        assert_eq!(
            broadcast.materialize().unwrap().to_elements::<u8>().unwrap(),
            vec![7, 9, 7, 9, 7, 9]
        );
        assert!(BroadcastArray::new(inner.clone(), vec![3, 3]).is_err());
        assert!(BroadcastArray::new(inner.clone(), vec![]).is_err());

        let ranked = broadcast.broadcast_to_rank(4).unwrap();
        assert_eq!(ranked.shape(), &[1, 1, 1, 2]);
        assert!(matches!(
            broadcast.broadcast_to_rank(0),
            Err(ArrayError::IncompatibleRank {
                array_rank: 1,
                target_rank: 0
            })
        ));

        let scalar = SharedArray::from_elements(vec![], &[5i16]).unwrap();
        let broadcast = BroadcastArray::new(scalar, vec![2, 2]).unwrap();
        assert_eq!(broadcast.byte_strides(), vec![0, 0]);
        assert_eq!(
            broadcast.materialize().unwrap().to_elements::<i16>().unwrap(),
            vec![5; 4]
        );
    }

    #[test]
    fn copy_region_2d() {
        // 3x4 source, copy the 2x2 block at (1, 1) into (0, 2) of a 2x4 destination.
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 8];
        copy_region(&src, &[3, 4], &[1, 1], &mut dst, &[2, 4], &[0, 2], &[2, 2], 1);
        assert_eq!(dst, vec![0, 0, 5, 6, 0, 0, 9, 10]);
    }

    #[test]
    fn copy_region_element_size() {
        let src: Vec<u8> = (0..8).collect();
        let mut dst = vec![0u8; 8];
        copy_region(&src, &[2, 2], &[0, 1], &mut dst, &[2, 2], &[1, 0], &[1, 1], 2);
        assert_eq!(dst, vec![0, 0, 0, 0, 2, 3, 0, 0]);
        let mut scalar = vec![0u8; 2];
        copy_region(&src, &[], &[], &mut scalar, &[], &[], &[], 2);
        assert_eq!(scalar, vec![0, 1]);
    }
}
