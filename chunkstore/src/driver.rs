//! Opened arrays.
//!
//! A [`Driver`] is an opened array.
//! Reads and writes address a region of the chunked dimensions; arrays passed in or out carry any trailing (field) dimensions after the region dimensions.

use std::sync::Arc;

use chunkstore_chunk_grid::{ArraySubset, BroadcastArray, SharedArray};
use chunkstore_data_type::DataType;
use serde_json::Value;

use crate::spec::Spec;
use crate::DriverError;

/// Whether a driver may read, write, or both.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReadWriteMode {
    /// Reads are permitted.
    pub read: bool,
    /// Writes are permitted.
    pub write: bool,
}

impl ReadWriteMode {
    /// Read only.
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    /// Write only.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    /// Read and write.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

impl Default for ReadWriteMode {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

/// Resize options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResizeOptions {
    /// Fail if any bound would shrink.
    pub expand_only: bool,
    /// Fail if any bound would grow.
    pub shrink_only: bool,
    /// Only update the metadata; chunks outside of the new bounds are left as is.
    pub resize_metadata_only: bool,
}

/// The chunk layout of an opened array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    /// The origin of the chunk grid.
    pub grid_origin: Vec<u64>,
    /// The shape of the chunks written as a unit.
    pub write_chunk_shape: Vec<u64>,
    /// The shape of the chunks read as a unit.
    pub read_chunk_shape: Vec<u64>,
    /// The order of dimensions within a chunk, outermost first.
    pub inner_order: Vec<usize>,
}

/// Traits for an opened array.
#[async_trait::async_trait]
pub trait DriverTraits: std::fmt::Debug + Send + Sync {
    /// Read `region` of the chunked dimensions.
    ///
    /// The shape of the result is the region shape followed by the trailing dimensions of the field.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the region is out of bounds, the driver is not readable, or a chunk cannot be read.
    async fn read(&self, region: &ArraySubset) -> Result<SharedArray, DriverError>;

    /// Write `array` to `region` of the chunked dimensions.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the region is out of bounds, `array` does not match the region, the driver is not writable, or a chunk cannot be written.
    async fn write(&self, region: &ArraySubset, array: &SharedArray) -> Result<(), DriverError>;

    /// Resize the array.
    ///
    /// Each bound is [`None`] to leave a dimension unchanged.
    /// Lower bounds are fixed at the origin.
    /// Returns a driver observing the resized metadata.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if a lower bound is nonzero, the resize violates `options`, the stored metadata is incompatible, or the update loses too many races with concurrent writers.
    async fn resize(
        &self,
        inclusive_min: &[Option<u64>],
        exclusive_max: &[Option<u64>],
        options: ResizeOptions,
    ) -> Result<Driver, DriverError>;

    /// Re-read the stored metadata and return a driver observing it.
    ///
    /// # Errors
    /// Returns [`ErrorKind::FailedPrecondition`](crate::ErrorKind::FailedPrecondition) if the stored metadata is no longer compatible with this driver.
    async fn resolve(&self) -> Result<Driver, DriverError>;

    /// The bound specification reproducing this driver.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification cannot be built.
    fn spec(&self) -> Result<Spec, DriverError>;

    /// The domain of every dimension, including the trailing dimensions of the field. The domain starts at the origin.
    fn domain(&self) -> ArraySubset;

    /// The element data type.
    fn dtype(&self) -> DataType;

    /// The number of dimensions, including the trailing dimensions of the field.
    fn rank(&self) -> usize;

    /// The fill value broadcast to `access_rank` dimensions.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if `access_rank` is less than the rank of the fill value.
    fn fill_value(&self, access_rank: usize) -> Result<BroadcastArray, DriverError>;

    /// The chunk layout.
    fn chunk_layout(&self) -> ChunkLayout;

    /// The codec (compressor and filters).
    fn codec(&self) -> Value;

    /// The read/write mode.
    fn read_write_mode(&self) -> ReadWriteMode;
}

/// An opened array.
pub type Driver = Arc<dyn DriverTraits>;
