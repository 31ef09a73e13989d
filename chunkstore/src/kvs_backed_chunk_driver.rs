//! Chunked arrays stored in a key-value store.
//!
//! A format (e.g. [`zarr`](crate::zarr)) implements [`KvsBackedFormat`] and [`DataCacheFormat`].
//! This module provides everything else: the specification ([`KvsSpec`]), the open protocol, the per-chunk read-modify-write cycle, and the driver.
//!
//! Opening a [`KvsSpec`] proceeds through these states:
//! 1. bind the context (before the open is spawned),
//! 2. fetch the metadata from the [`MetadataCache`](crate::metadata_cache::MetadataCache) of the pool, creating it if requested,
//! 3. validate the metadata against the specification,
//! 4. resolve the component (field) selected by the specification and validate the schema against it,
//! 5. get or create the data cache of the pool and construct the driver.
//!
//! A failure in any state fails the open; no driver is returned.

mod data_cache;
mod driver;
mod spec;

use chunkstore_chunk_grid::{ArrayIndices, ChunkGridBounds, ChunkGridSpecification, SharedArray};
use serde_json::{Map, Value};

pub use spec::KvsSpec;
pub(crate) use spec::take_member;

use crate::cache_key::CacheKeyEncoder;
use crate::driver::ChunkLayout;
use crate::metadata_cache::MetadataFormat;
use crate::schema::Schema;
use crate::DriverError;

/// A chunked array format stored in a key-value store.
pub trait KvsBackedFormat: MetadataFormat + Clone + std::fmt::Debug {
    /// The driver identifier.
    const ID: &'static str;

    /// The format-specific members of the specification.
    type SpecData: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// The format-specific part of the data cache.
    type DataCache: DataCacheFormat<Metadata = Self::Metadata>;

    /// Parse the format-specific members of a specification, removing them from `members`.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if a member is invalid.
    fn spec_data_from_json(members: &mut Map<String, Value>) -> Result<Self::SpecData, DriverError>;

    /// Add the format-specific members of a specification to `members`.
    fn spec_data_to_json(data: &Self::SpecData, members: &mut Map<String, Value>);

    /// Apply the schema and the `minimal_spec` option to the format-specific members.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if the schema conflicts with the members.
    fn apply_options(
        data: &mut Self::SpecData,
        schema: &Schema,
        minimal_spec: bool,
    ) -> Result<(), DriverError>;

    /// Encode the format-specific members that affect the stored chunks.
    fn encode_spec_cache_key(data: &Self::SpecData, encoder: &mut CacheKeyEncoder);

    /// The metadata key of the array stored under `key_prefix`.
    fn metadata_key(key_prefix: &str) -> String;

    /// Create new metadata from the specification.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification does not determine valid metadata.
    fn create_metadata(
        data: &Self::SpecData,
        schema: &Schema,
    ) -> Result<Self::Metadata, DriverError>;

    /// Check the metadata constraints of the specification against existing metadata.
    ///
    /// # Errors
    /// Returns [`ErrorKind::FailedPrecondition`](crate::ErrorKind::FailedPrecondition) on a mismatch.
    fn validate_metadata(data: &Self::SpecData, metadata: &Self::Metadata)
        -> Result<(), DriverError>;

    /// Resolve the component (field) selected by the specification.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if the selection does not identify exactly one component.
    fn component_index(data: &Self::SpecData, metadata: &Self::Metadata)
        -> Result<usize, DriverError>;

    /// Check the format-specific schema constraints (e.g. fill value and codec) against the component.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a mismatch.
    fn validate_schema(
        schema: &Schema,
        metadata: &Self::Metadata,
        component_index: usize,
    ) -> Result<(), DriverError>;

    /// Encode the part of the metadata that must match for two drivers to share a data cache.
    ///
    /// `data` supplies defaults for members the metadata leaves unspecified.
    fn encode_data_cache_key(
        data: &Self::SpecData,
        key_prefix: &str,
        metadata: &Self::Metadata,
        encoder: &mut CacheKeyEncoder,
    );

    /// Create the format-specific part of a data cache.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the metadata cannot be interpreted, e.g. an unsupported compressor.
    fn make_data_cache(
        data: &Self::SpecData,
        key_prefix: &str,
        metadata: &Self::Metadata,
    ) -> Result<Self::DataCache, DriverError>;

    /// The format-specific members reproducing a driver opened with `metadata` and `component_index`.
    fn bound_spec_data(
        data: &Self::SpecData,
        metadata: &Self::Metadata,
        component_index: usize,
    ) -> Self::SpecData;
}

/// The format-specific part of a data cache.
///
/// A data cache serves every metadata that is compatible with the metadata it was created for.
pub trait DataCacheFormat: std::fmt::Debug + Send + Sync + 'static {
    /// The decoded metadata.
    type Metadata: Send + Sync + 'static;

    /// Check that `new` metadata can be used in place of `existing` metadata by an open driver.
    ///
    /// # Errors
    /// Returns [`ErrorKind::FailedPrecondition`](crate::ErrorKind::FailedPrecondition) if any member other than the shape differs.
    fn validate_metadata_compatibility(
        &self,
        existing: &Self::Metadata,
        new: &Self::Metadata,
    ) -> Result<(), DriverError>;

    /// The metadata resized to `new_exclusive_max`. [`None`] leaves a dimension unchanged.
    ///
    /// # Panics
    /// Panics if a lower bound is nonzero; the grid is anchored at the origin.
    fn resized_metadata(
        &self,
        existing: &Self::Metadata,
        new_inclusive_min: &[Option<u64>],
        new_exclusive_max: &[Option<u64>],
    ) -> Self::Metadata;

    /// The bounds of the chunked dimensions.
    fn chunk_grid_bounds(&self, metadata: &Self::Metadata) -> ChunkGridBounds;

    /// The chunk grid. The chunked dimensions map onto the leading cell dimensions of every component.
    fn chunk_grid_specification(&self) -> &ChunkGridSpecification;

    /// The key prefix of the array.
    fn key_prefix(&self) -> &str;

    /// The storage key of the chunk at `chunk_indices`.
    fn chunk_storage_key(&self, chunk_indices: &[u64]) -> String;

    /// The chunk indices of a storage key, or [`None`] if `key` is not a chunk key of this array.
    fn parse_chunk_storage_key(&self, key: &str) -> Option<ArrayIndices>;

    /// Decode a stored chunk to one array per component.
    ///
    /// # Errors
    /// Returns [`ErrorKind::DataLoss`](crate::ErrorKind::DataLoss) if `bytes` are malformed or truncated.
    fn decode_chunk(
        &self,
        metadata: &Self::Metadata,
        chunk_indices: &[u64],
        bytes: &[u8],
    ) -> Result<Vec<SharedArray>, DriverError>;

    /// Encode one array per component to a stored chunk.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the chunk cannot be encoded.
    fn encode_chunk(
        &self,
        metadata: &Self::Metadata,
        chunk_indices: &[u64],
        components: &[SharedArray],
    ) -> Result<Vec<u8>, DriverError>;

    /// The chunk layout of a component.
    fn chunk_layout(&self, metadata: &Self::Metadata, component_index: usize) -> ChunkLayout;

    /// The codec as JSON.
    fn codec(&self, metadata: &Self::Metadata) -> Value;
}
