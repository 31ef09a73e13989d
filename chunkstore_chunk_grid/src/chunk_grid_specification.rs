use std::ops::Range;

use chunkstore_data_type::DataType;
use thiserror::Error;

use crate::{ArrayIndices, ArrayShape, ArraySubset, ArraySubsetError, BroadcastArray};

/// A chunk grid specification error.
#[derive(Clone, Debug, Error)]
pub enum ChunkGridSpecificationError {
    /// A component maps a different number of dimensions than the grid has.
    #[error("component {component} maps {mapped} chunked dimensions, expected {expected}")]
    IncompatibleDimensionality {
        /// The component index.
        component: usize,
        /// The number of mapped dimensions.
        mapped: usize,
        /// The grid rank.
        expected: usize,
    },
    /// A mapped cell dimension does not match the chunk shape.
    #[error("component {component} cell dimension {cell_dimension} does not match the chunk shape {chunk_shape:?}")]
    CellShapeMismatch {
        /// The component index.
        component: usize,
        /// The cell dimension.
        cell_dimension: usize,
        /// The chunk shape.
        chunk_shape: ArrayShape,
    },
    /// The component bounds have a different rank than the cell.
    #[error("component {0} bounds do not match the cell rank")]
    BoundsRank(usize),
}

/// A component (field) of a chunk grid.
///
/// A cell is the in-memory representation of one chunk of the component.
/// Its shape is given by the fill value; the chunked dimensions of the grid map onto a subset of the cell dimensions, and any remaining cell dimensions are not chunked.
#[derive(Clone, Debug)]
pub struct ChunkGridComponent {
    fill_value: BroadcastArray,
    component_bounds: Vec<Option<Range<u64>>>,
    chunked_to_cell_dimensions: Vec<usize>,
}

impl ChunkGridComponent {
    /// Create a new component with unbounded cell dimensions.
    #[must_use]
    pub fn new(fill_value: BroadcastArray, chunked_to_cell_dimensions: Vec<usize>) -> Self {
        let component_bounds = vec![None; fill_value.shape().len()];
        Self {
            fill_value,
            component_bounds,
            chunked_to_cell_dimensions,
        }
    }

    /// Set the bounds of each cell dimension. [`None`] is unbounded.
    #[must_use]
    pub fn with_component_bounds(mut self, component_bounds: Vec<Option<Range<u64>>>) -> Self {
        self.component_bounds = component_bounds;
        self
    }

    /// The element data type.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.fill_value.data_type()
    }

    /// The fill value, broadcast to the cell shape.
    #[must_use]
    pub const fn fill_value(&self) -> &BroadcastArray {
        &self.fill_value
    }

    /// The cell shape.
    #[must_use]
    pub fn cell_shape(&self) -> &[u64] {
        self.fill_value.shape()
    }

    /// The rank of a cell.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.cell_shape().len()
    }

    /// The bounds of each cell dimension.
    #[must_use]
    pub fn component_bounds(&self) -> &[Option<Range<u64>>] {
        &self.component_bounds
    }

    /// The cell dimension of each chunked grid dimension.
    #[must_use]
    pub fn chunked_to_cell_dimensions(&self) -> &[usize] {
        &self.chunked_to_cell_dimensions
    }

    /// The shape of the cell dimensions that are not chunked, in cell order.
    #[must_use]
    pub fn unchunked_shape(&self) -> ArrayShape {
        self.cell_shape()
            .iter()
            .enumerate()
            .filter(|(dim, _)| !self.chunked_to_cell_dimensions.contains(dim))
            .map(|(_, size)| *size)
            .collect()
    }

    /// The number of bytes of the unchunked part of a cell per chunked element.
    #[must_use]
    pub fn inner_num_bytes(&self) -> usize {
        let inner: u64 = self.unchunked_shape().iter().product();
        usize::try_from(inner).unwrap_or(usize::MAX) * self.data_type().size()
    }
}

/// Describes the cells (chunks) of every component of a chunked array.
#[derive(Clone, Debug)]
pub struct ChunkGridSpecification {
    components: Vec<ChunkGridComponent>,
    chunk_shape: ArrayShape,
}

impl ChunkGridSpecification {
    /// Create a new chunk grid specification.
    ///
    /// # Errors
    /// Returns a [`ChunkGridSpecificationError`] if a component does not map every chunked dimension onto a cell dimension of the same size.
    pub fn new(
        components: Vec<ChunkGridComponent>,
        chunk_shape: ArrayShape,
    ) -> Result<Self, ChunkGridSpecificationError> {
        for (index, component) in components.iter().enumerate() {
            if component.chunked_to_cell_dimensions.len() != chunk_shape.len() {
                return Err(ChunkGridSpecificationError::IncompatibleDimensionality {
                    component: index,
                    mapped: component.chunked_to_cell_dimensions.len(),
                    expected: chunk_shape.len(),
                });
            }
            if component.component_bounds.len() != component.rank() {
                return Err(ChunkGridSpecificationError::BoundsRank(index));
            }
            for (&cell_dimension, &size) in
                std::iter::zip(&component.chunked_to_cell_dimensions, &chunk_shape)
            {
                if component.cell_shape().get(cell_dimension) != Some(&size) {
                    return Err(ChunkGridSpecificationError::CellShapeMismatch {
                        component: index,
                        cell_dimension,
                        chunk_shape,
                    });
                }
            }
        }
        Ok(Self {
            components,
            chunk_shape,
        })
    }

    /// The components.
    #[must_use]
    pub fn components(&self) -> &[ChunkGridComponent] {
        &self.components
    }

    /// The shape of a chunk over the chunked dimensions.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// The number of chunked dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.chunk_shape.len()
    }

    /// The origin of the chunk at `chunk_indices`.
    #[must_use]
    pub fn chunk_origin(&self, chunk_indices: &[u64]) -> ArrayIndices {
        std::iter::zip(chunk_indices, &self.chunk_shape)
            .map(|(index, size)| index * size)
            .collect()
    }

    /// The subset of the chunked dimensions covered by the chunk at `chunk_indices`.
    #[must_use]
    pub fn chunk_subset(&self, chunk_indices: &[u64]) -> ArraySubset {
        ArraySubset::new_with_start_shape(self.chunk_origin(chunk_indices), self.chunk_shape.clone())
            .unwrap_or_else(|_| ArraySubset::new_with_shape(self.chunk_shape.clone()))
    }

    /// The chunks intersecting `region`, as a subset of the grid of chunk indices.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if `region` does not have the grid rank.
    pub fn chunks_in_region(&self, region: &ArraySubset) -> Result<ArraySubset, ArraySubsetError> {
        region.chunks(&self.chunk_shape)
    }
}

/// The bounds of a chunk grid over the chunked dimensions.
///
/// The grid is anchored at the origin; an implicit bound may change through a resize.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkGridBounds {
    /// The exclusive upper bound of each dimension.
    pub shape: ArrayShape,
    /// Whether each lower bound is implicit.
    pub implicit_lower: Vec<bool>,
    /// Whether each upper bound is implicit.
    pub implicit_upper: Vec<bool>,
}

impl ChunkGridBounds {
    /// Bounds with explicit lower and implicit upper bounds in every dimension.
    #[must_use]
    pub fn resizable(shape: ArrayShape) -> Self {
        let rank = shape.len();
        Self {
            shape,
            implicit_lower: vec![false; rank],
            implicit_upper: vec![true; rank],
        }
    }

    /// The inclusive lower bound of each dimension.
    #[must_use]
    pub fn inclusive_min(&self) -> ArrayIndices {
        vec![0; self.shape.len()]
    }

    /// The bounds as a subset.
    #[must_use]
    pub fn to_subset(&self) -> ArraySubset {
        ArraySubset::new_with_shape(self.shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedArray;

    fn component(chunks: &[u64], inner: &[u64]) -> ChunkGridComponent {
        let mut cell_shape = chunks.to_vec();
        cell_shape.extend_from_slice(inner);
        let fill = SharedArray::from_elements(inner.to_vec(), &vec![1u8; inner.iter().product::<u64>() as usize]).unwrap();
        let fill = BroadcastArray::new(fill, cell_shape).unwrap();
        ChunkGridComponent::new(fill, (0..chunks.len()).collect())
    }

    #[test]
    fn specification() {
        let spec = ChunkGridSpecification::new(
            vec![component(&[2, 3], &[]), component(&[2, 3], &[4])],
            vec![2, 3],
        )
        .unwrap();
        assert_eq!(spec.rank(), 2);
        assert_eq!(spec.chunk_origin(&[1, 2]), vec![2, 6]);
        assert_eq!(spec.chunk_subset(&[1, 2]).to_ranges(), vec![2..4, 6..9]);
        let field = &spec.components()[1];
        assert_eq!(field.cell_shape(), &[2, 3, 4]);
        assert_eq!(field.unchunked_shape(), vec![4]);
        assert_eq!(field.inner_num_bytes(), 4);
        assert_eq!(field.component_bounds(), &[None, None, None]);
        assert_eq!(
            spec.chunks_in_region(&ArraySubset::new_with_ranges(&[1..3, 0..7]))
                .unwrap()
                .to_ranges(),
            vec![0..2, 0..3]
        );
    }

    #[test]
    fn specification_invalid() {
        assert!(matches!(
            ChunkGridSpecification::new(vec![component(&[2, 3], &[])], vec![2, 2]),
            Err(ChunkGridSpecificationError::CellShapeMismatch { .. })
        ));
        assert!(matches!(
            ChunkGridSpecification::new(vec![component(&[2], &[])], vec![2, 2]),
            Err(ChunkGridSpecificationError::IncompatibleDimensionality { .. })
        ));
    }

    #[test]
    fn bounds() {
        let bounds = ChunkGridBounds::resizable(vec![4, 5]);
        assert_eq!(bounds.inclusive_min(), vec![0, 0]);
        assert_eq!(bounds.implicit_lower, vec![false, false]);
        assert_eq!(bounds.implicit_upper, vec![true, true]);
        assert_eq!(bounds.to_subset().num_elements(), 20);
    }
}
