use std::sync::Arc;

use chunkstore_chunk_grid::{copy_region, ArrayIndices, ArraySubset, BroadcastArray, SharedArray};
use chunkstore_data_type::DataType;
use chunkstore_storage::StorePrefix;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;

use super::data_cache::KvsDataCache;
use super::{DataCacheFormat, KvsBackedFormat, KvsSpec};
use crate::driver::{ChunkLayout, Driver, DriverTraits, ReadWriteMode, ResizeOptions};
use crate::metadata_cache::MetadataCacheEntry;
use crate::spec::Spec;
use crate::DriverError;

/// An opened array of format `F`.
///
/// Holds an immutable snapshot of the metadata; [`DriverTraits::resize`] and [`DriverTraits::resolve`] return a new driver with a newer snapshot.
pub(crate) struct KvsDriver<F: KvsBackedFormat> {
    spec: Arc<KvsSpec<F>>,
    metadata_cache_entry: Arc<MetadataCacheEntry<F>>,
    metadata: Arc<F::Metadata>,
    data_cache: Arc<KvsDataCache<F>>,
    component_index: usize,
    read_write_mode: ReadWriteMode,
    concurrency_limit: usize,
}

impl<F: KvsBackedFormat> std::fmt::Debug for KvsDriver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvsDriver")
            .field("driver", &F::ID)
            .field("metadata", &self.metadata)
            .field("component_index", &self.component_index)
            .field("read_write_mode", &self.read_write_mode)
            .finish_non_exhaustive()
    }
}

impl<F: KvsBackedFormat> KvsDriver<F> {
    pub(crate) fn new(
        spec: Arc<KvsSpec<F>>,
        metadata_cache_entry: Arc<MetadataCacheEntry<F>>,
        metadata: Arc<F::Metadata>,
        data_cache: Arc<KvsDataCache<F>>,
        component_index: usize,
        read_write_mode: ReadWriteMode,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            spec,
            metadata_cache_entry,
            metadata,
            data_cache,
            component_index,
            read_write_mode,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    fn with_metadata(&self, metadata: Arc<F::Metadata>) -> Driver {
        Arc::new(Self {
            spec: self.spec.clone(),
            metadata_cache_entry: self.metadata_cache_entry.clone(),
            metadata,
            data_cache: self.data_cache.clone(),
            component_index: self.component_index,
            read_write_mode: self.read_write_mode,
            concurrency_limit: self.concurrency_limit,
        })
    }

    fn format(&self) -> &F::DataCache {
        self.data_cache.format()
    }

    fn bounds(&self) -> ArraySubset {
        self.format().chunk_grid_bounds(&self.metadata).to_subset()
    }

    fn inner_num_bytes(&self) -> usize {
        self.format().chunk_grid_specification().components()[self.component_index]
            .inner_num_bytes()
    }

    fn unchunked_shape(&self) -> Vec<u64> {
        self.format().chunk_grid_specification().components()[self.component_index]
            .unchunked_shape()
    }

    fn validate_region(&self, region: &ArraySubset) -> Result<(), DriverError> {
        let bounds = self.bounds();
        if region.dimensionality() != bounds.dimensionality() {
            return Err(DriverError::invalid_argument(format!(
                "region {region} has {} dimensions, expected {}",
                region.dimensionality(),
                bounds.dimensionality()
            )));
        }
        if !region.inbounds_shape(bounds.shape()) {
            return Err(DriverError::out_of_range(format!(
                "region {region} is outside of the bounds {bounds}"
            )));
        }
        Ok(())
    }

    fn chunks_in_region(&self, region: &ArraySubset) -> Result<ArraySubset, DriverError> {
        self.format()
            .chunk_grid_specification()
            .chunks_in_region(region)
            .map_err(|err| DriverError::invalid_argument(err.to_string()))
    }

    /// The overlap of a chunk with `region`, relative to the chunk and relative to the region.
    fn chunk_overlap(
        &self,
        chunk_indices: &[u64],
        region: &ArraySubset,
    ) -> Result<(ArraySubset, ArrayIndices), DriverError> {
        let chunk = self
            .format()
            .chunk_grid_specification()
            .chunk_subset(chunk_indices);
        let overlap = chunk
            .overlap(region)
            .map_err(|err| DriverError::internal(err.to_string()))?;
        let in_region = overlap
            .relative_to(region.start())
            .map_err(|err| DriverError::internal(err.to_string()))?;
        let in_chunk = overlap
            .relative_to(chunk.start())
            .map_err(|err| DriverError::internal(err.to_string()))?;
        Ok((in_chunk, in_region.start().to_vec()))
    }

    /// Erase chunks outside of `new_bounds` that were within `old_bounds`, and reset the out-of-bounds part of chunks that are partially within `new_bounds`.
    async fn discard_out_of_bounds(
        &self,
        metadata: &F::Metadata,
        old_bounds: &ArraySubset,
        new_bounds: &ArraySubset,
    ) -> Result<(), DriverError> {
        if old_bounds.inbounds_shape(new_bounds.shape()) {
            return Ok(());
        }
        let format = self.format();
        let prefix = StorePrefix::new(format.key_prefix())
            .map_err(|err| DriverError::invalid_argument(err.to_string()))?;
        let keys = self
            .data_cache
            .store()
            .list_prefix(&prefix)
            .await
            .map_err(|err| DriverError::storage("listing", prefix.as_str(), err))?;
        let grid = format.chunk_grid_specification();
        let chunks: Vec<ArrayIndices> = keys
            .iter()
            .filter_map(|key| format.parse_chunk_storage_key(key.as_str()))
            .filter(|chunk_indices| {
                !grid
                    .chunk_subset(chunk_indices)
                    .inbounds_shape(new_bounds.shape())
            })
            .collect();
        log::debug!(
            "{}: discarding {} chunks outside of {new_bounds}",
            F::ID,
            chunks.len()
        );
        futures::stream::iter(chunks)
            .map(|chunk_indices| async move {
                let chunk = grid.chunk_subset(&chunk_indices);
                let retained = chunk
                    .overlap(new_bounds)
                    .map_err(|err| DriverError::internal(err.to_string()))?;
                if retained.is_empty() {
                    self.data_cache.erase_chunk(&chunk_indices).await
                } else {
                    self.data_cache
                        .modify_chunk(metadata, &chunk_indices, |cells| {
                            let components = std::iter::zip(cells.iter(), grid.components())
                                .map(|(bytes, component)| {
                                    SharedArray::new(
                                        component.data_type(),
                                        component.cell_shape().to_vec(),
                                        bytes.clone(),
                                    )
                                    .map_err(|err| DriverError::internal(err.to_string()))
                                })
                                .collect::<Result<Vec<_>, _>>()?;
                            let retained = self.data_cache.retain_region(
                                &chunk_indices,
                                new_bounds,
                                components,
                            )?;
                            for (cell, component) in std::iter::zip(cells.iter_mut(), retained) {
                                *cell = component.into_bytes().to_vec();
                            }
                            Ok(())
                        })
                        .await
                }
            })
            .buffer_unordered(self.concurrency_limit)
            .try_collect::<()>()
            .await
    }
}

#[async_trait::async_trait]
impl<F: KvsBackedFormat> DriverTraits for KvsDriver<F> {
    async fn read(&self, region: &ArraySubset) -> Result<SharedArray, DriverError> {
        if !self.read_write_mode.read {
            return Err(DriverError::invalid_argument("the array was not opened for reading"));
        }
        self.validate_region(region)?;
        let chunks = self.chunks_in_region(region)?;
        let inner_num_bytes = self.inner_num_bytes();
        let mut shape = region.shape().to_vec();
        shape.extend(self.unchunked_shape());
        let mut output = SharedArray::new_zeroed(self.dtype(), shape.clone())
            .map_err(|err| DriverError::invalid_argument(err.to_string()))?
            .into_bytes()
            .to_vec();
        let fill = self
            .format()
            .chunk_grid_specification()
            .components()[self.component_index]
            .fill_value()
            .materialize()
            .map_err(|err| DriverError::internal(err.to_string()))?;

        let snapshots: Vec<_> = futures::stream::iter(chunks.indices())
            .map(|chunk_indices| async move {
                let snapshot = self
                    .data_cache
                    .read_chunk(&self.metadata, &chunk_indices)
                    .await?;
                Ok::<_, DriverError>((chunk_indices, snapshot))
            })
            .buffer_unordered(self.concurrency_limit)
            .try_collect()
            .await?;

        let chunk_shape = self.format().chunk_grid_specification().chunk_shape();
        for (chunk_indices, snapshot) in snapshots {
            let cell = match snapshot.as_ref() {
                Some(components) => components[self.component_index].as_bytes(),
                None => fill.as_bytes(),
            };
            let (in_chunk, region_start) = self.chunk_overlap(&chunk_indices, region)?;
            copy_region(
                cell,
                chunk_shape,
                in_chunk.start(),
                &mut output,
                region.shape(),
                &region_start,
                in_chunk.shape(),
                inner_num_bytes,
            );
        }
        SharedArray::new(self.dtype(), shape, output)
            .map_err(|err| DriverError::internal(err.to_string()))
    }

    async fn write(&self, region: &ArraySubset, array: &SharedArray) -> Result<(), DriverError> {
        if !self.read_write_mode.write {
            return Err(DriverError::invalid_argument("the array was not opened for writing"));
        }
        self.validate_region(region)?;
        let mut shape = region.shape().to_vec();
        shape.extend(self.unchunked_shape());
        if array.data_type() != self.dtype() || array.shape() != shape {
            return Err(DriverError::invalid_argument(format!(
                "array of {} with shape {:?} does not match {} with shape {shape:?}",
                array.data_type(),
                array.shape(),
                self.dtype()
            )));
        }
        let chunks = self.chunks_in_region(region)?;
        let inner_num_bytes = self.inner_num_bytes();
        let chunk_shape = self.format().chunk_grid_specification().chunk_shape();
        futures::stream::iter(chunks.indices())
            .map(|chunk_indices| async move {
                let (in_chunk, region_start) = self.chunk_overlap(&chunk_indices, region)?;
                self.data_cache
                    .modify_chunk(&self.metadata, &chunk_indices, |cells| {
                        copy_region(
                            array.as_bytes(),
                            region.shape(),
                            &region_start,
                            &mut cells[self.component_index],
                            chunk_shape,
                            in_chunk.start(),
                            in_chunk.shape(),
                            inner_num_bytes,
                        );
                        Ok(())
                    })
                    .await
            })
            .buffer_unordered(self.concurrency_limit)
            .try_collect::<()>()
            .await
    }

    async fn resize(
        &self,
        inclusive_min: &[Option<u64>],
        exclusive_max: &[Option<u64>],
        options: ResizeOptions,
    ) -> Result<Driver, DriverError> {
        if !self.read_write_mode.write {
            return Err(DriverError::invalid_argument("the array was not opened for writing"));
        }
        let rank = self.bounds().dimensionality();
        if inclusive_min.len() != rank || exclusive_max.len() != rank {
            return Err(DriverError::invalid_argument(format!(
                "resize bounds must have {rank} dimensions"
            )));
        }
        if inclusive_min.iter().any(|min| !matches!(min, None | Some(0))) {
            return Err(DriverError::invalid_argument(format!(
                "lower bounds {inclusive_min:?} must be zero"
            )));
        }

        let format = self.format();
        let mut old_bounds = None;
        let metadata = self
            .metadata_cache_entry
            .update(|existing| {
                format.validate_metadata_compatibility(&self.metadata, existing)?;
                let bounds = format.chunk_grid_bounds(existing).shape;
                for (dim, (&old, new)) in std::iter::zip(&bounds, exclusive_max).enumerate() {
                    let Some(new) = *new else { continue };
                    if options.expand_only && new < old {
                        return Err(DriverError::failed_precondition(format!(
                            "resize of dimension {dim} from {old} to {new} would shrink the array"
                        )));
                    }
                    if options.shrink_only && new > old {
                        return Err(DriverError::failed_precondition(format!(
                            "resize of dimension {dim} from {old} to {new} would expand the array"
                        )));
                    }
                }
                old_bounds = Some(ArraySubset::new_with_shape(bounds));
                Ok(format.resized_metadata(existing, inclusive_min, exclusive_max))
            })
            .await?;
        log::debug!("{}: resized {:?}", F::ID, self.metadata_cache_entry.key());

        if !options.resize_metadata_only {
            if let Some(old_bounds) = old_bounds {
                let new_bounds = format.chunk_grid_bounds(&metadata).to_subset();
                self.discard_out_of_bounds(&metadata, &old_bounds, &new_bounds)
                    .await?;
            }
        }
        Ok(self.with_metadata(metadata))
    }

    async fn resolve(&self) -> Result<Driver, DriverError> {
        let metadata = self.metadata_cache_entry.refresh().await?.ok_or_else(|| {
            DriverError::not_found(format!(
                "metadata {} was deleted",
                self.metadata_cache_entry.key()
            ))
        })?;
        self.format()
            .validate_metadata_compatibility(&self.metadata, &metadata)?;
        Ok(self.with_metadata(metadata))
    }

    fn spec(&self) -> Result<Spec, DriverError> {
        let data = F::bound_spec_data(self.spec.data(), &self.metadata, self.component_index);
        Ok(Spec::new(Arc::new(
            self.spec.bound(data, self.read_write_mode),
        )))
    }

    fn domain(&self) -> ArraySubset {
        let mut shape = self.bounds().shape().to_vec();
        shape.extend(self.unchunked_shape());
        ArraySubset::new_with_shape(shape)
    }

    fn dtype(&self) -> DataType {
        self.format().chunk_grid_specification().components()[self.component_index].data_type()
    }

    fn rank(&self) -> usize {
        self.format().chunk_grid_specification().components()[self.component_index].rank()
    }

    fn fill_value(&self, access_rank: usize) -> Result<BroadcastArray, DriverError> {
        self.format().chunk_grid_specification().components()[self.component_index]
            .fill_value()
            .broadcast_to_rank(access_rank)
            .map_err(|err| DriverError::invalid_argument(err.to_string()))
    }

    fn chunk_layout(&self) -> ChunkLayout {
        self.format()
            .chunk_layout(&self.metadata, self.component_index)
    }

    fn codec(&self) -> Value {
        self.format().codec(&self.metadata)
    }

    fn read_write_mode(&self) -> ReadWriteMode {
        self.read_write_mode
    }
}
