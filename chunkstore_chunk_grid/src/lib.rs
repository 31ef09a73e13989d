//! Array subsets, element arrays, and the chunk grid specification for the `chunkstore` crate.
//!
//! - An [`ArraySubset`] is a box within an array, anchored at a start index.
//! - A [`SharedArray`] is a dense C-order array of elements of one [`DataType`](chunkstore_data_type::DataType).
//! - A [`BroadcastArray`] repeats a [`SharedArray`] across leading dimensions with zero stride. Fill values are broadcast arrays.
//! - A [`ChunkGridSpecification`] describes the cells (chunks) of each component of a chunked array.

mod array_subset;
pub use array_subset::{ArraySubset, ArraySubsetError, Indices};

mod array;
pub use array::{copy_region, ArrayError, BroadcastArray, SharedArray};

mod chunk_grid_specification;
pub use chunk_grid_specification::{
    ChunkGridBounds, ChunkGridComponent, ChunkGridSpecification, ChunkGridSpecificationError,
};

/// An array shape.
pub type ArrayShape = Vec<u64>;

/// Array indices.
pub type ArrayIndices = Vec<u64>;
