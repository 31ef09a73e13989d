use std::sync::Arc;

use chunkstore_chunk_grid::{copy_region, ArrayError, ArraySubset, SharedArray};
use chunkstore_storage::{AsyncReadableWritableStorage, StorageError, StoreKey};

use super::{DataCacheFormat, KvsBackedFormat};
use crate::chunk_cache::{ChunkCache, ChunkLocks, ChunkSnapshot};
use crate::config::global_config;
use crate::context::CachePool;
use crate::DriverError;

fn array_error(err: ArrayError) -> DriverError {
    DriverError::internal(err.to_string())
}

/// The chunks of one array (or of arrays with compatible metadata) cached in the chunk cache of a pool.
pub(crate) struct KvsDataCache<F: KvsBackedFormat> {
    format: F::DataCache,
    store: AsyncReadableWritableStorage,
    key: Arc<str>,
    chunk_cache: ChunkCache,
    locks: ChunkLocks,
}

impl<F: KvsBackedFormat> std::fmt::Debug for KvsDataCache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvsDataCache")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl<F: KvsBackedFormat> KvsDataCache<F> {
    pub(crate) fn new(
        format: F::DataCache,
        store: AsyncReadableWritableStorage,
        key: Arc<str>,
        cache_pool: &CachePool,
    ) -> Self {
        Self {
            format,
            store,
            key,
            chunk_cache: cache_pool.chunk_cache().clone(),
            locks: ChunkLocks::new(global_config().chunk_lock_stripes()),
        }
    }

    pub(crate) fn format(&self) -> &F::DataCache {
        &self.format
    }

    pub(crate) fn store(&self) -> &AsyncReadableWritableStorage {
        &self.store
    }

    fn storage_key(&self, chunk_indices: &[u64]) -> Result<StoreKey, DriverError> {
        let key = self.format.chunk_storage_key(chunk_indices);
        StoreKey::new(key.clone())
            .map_err(|err| DriverError::storage("encoding", key, StorageError::from(err)))
    }

    /// The fill value of every component, written out to the cell shape.
    pub(crate) fn fill_cells(&self) -> Result<Vec<SharedArray>, DriverError> {
        self.format
            .chunk_grid_specification()
            .components()
            .iter()
            .map(|component| component.fill_value().materialize().map_err(array_error))
            .collect()
    }

    /// Replace the cells of `components` outside `bounds` with the fill value.
    pub(crate) fn retain_region(
        &self,
        chunk_indices: &[u64],
        bounds: &ArraySubset,
        components: Vec<SharedArray>,
    ) -> Result<Vec<SharedArray>, DriverError> {
        let grid = self.format.chunk_grid_specification();
        let chunk = grid.chunk_subset(chunk_indices);
        let retained = chunk
            .overlap(bounds)
            .and_then(|overlap| overlap.relative_to(chunk.start()))
            .map_err(|err| DriverError::internal(err.to_string()))?;
        if retained.shape() == chunk.shape() {
            return Ok(components);
        }
        std::iter::zip(components, self.fill_cells()?)
            .zip(grid.components())
            .map(|((cell, fill), component)| {
                let mut bytes = fill.into_bytes().to_vec();
                copy_region(
                    cell.as_bytes(),
                    grid.chunk_shape(),
                    retained.start(),
                    &mut bytes,
                    grid.chunk_shape(),
                    retained.start(),
                    retained.shape(),
                    component.inner_num_bytes(),
                );
                SharedArray::new(cell.data_type(), cell.shape().to_vec(), bytes)
                    .map_err(array_error)
            })
            .collect()
    }

    async fn load_chunk(
        &self,
        metadata: &F::Metadata,
        chunk_indices: &[u64],
    ) -> Result<ChunkSnapshot, DriverError> {
        let key = self.storage_key(chunk_indices)?;
        let bytes = self
            .store
            .get(&key)
            .await
            .map_err(|err| DriverError::storage("reading", key.as_str(), err))?;
        log::trace!("loaded chunk {key} ({} bytes)", bytes.as_ref().map_or(0, |b| b.len()));
        let Some(bytes) = bytes else {
            return Ok(Arc::new(None));
        };
        let components = self
            .format
            .decode_chunk(metadata, chunk_indices, &bytes)
            .map_err(|err| err.with_context(&key))?;
        let bounds = self.format.chunk_grid_bounds(metadata).to_subset();
        let components = self.retain_region(chunk_indices, &bounds, components)?;
        Ok(Arc::new(Some(components)))
    }

    /// Read the chunk at `chunk_indices`. The snapshot is [`None`] if the chunk is not stored.
    pub(crate) async fn read_chunk(
        &self,
        metadata: &F::Metadata,
        chunk_indices: &[u64],
    ) -> Result<ChunkSnapshot, DriverError> {
        if let Some(snapshot) = self.chunk_cache.get(&self.key, chunk_indices).await {
            return Ok(snapshot);
        }
        let _guard = self.locks.lock(chunk_indices).await;
        if let Some(snapshot) = self.chunk_cache.get(&self.key, chunk_indices).await {
            return Ok(snapshot);
        }
        let snapshot = self.load_chunk(metadata, chunk_indices).await?;
        self.chunk_cache
            .insert(&self.key, chunk_indices, snapshot.clone())
            .await;
        Ok(snapshot)
    }

    /// Read, modify and write back the chunk at `chunk_indices`.
    ///
    /// `modify` receives the cell bytes of every component; a chunk that is not stored starts as the fill value.
    pub(crate) async fn modify_chunk(
        &self,
        metadata: &F::Metadata,
        chunk_indices: &[u64],
        modify: impl FnOnce(&mut [Vec<u8>]) -> Result<(), DriverError>,
    ) -> Result<(), DriverError> {
        let _guard = self.locks.lock(chunk_indices).await;
        let snapshot = match self.chunk_cache.get(&self.key, chunk_indices).await {
            Some(snapshot) => snapshot,
            None => self.load_chunk(metadata, chunk_indices).await?,
        };
        let current = match snapshot.as_ref() {
            Some(components) => components.clone(),
            None => self.fill_cells()?,
        };
        let mut cells: Vec<Vec<u8>> = current
            .iter()
            .map(|cell| cell.as_bytes().to_vec())
            .collect();
        modify(&mut cells)?;
        let components = std::iter::zip(cells, &current)
            .map(|(bytes, cell)| {
                SharedArray::new(cell.data_type(), cell.shape().to_vec(), bytes)
                    .map_err(array_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let key = self.storage_key(chunk_indices)?;
        let encoded = self
            .format
            .encode_chunk(metadata, chunk_indices, &components)
            .map_err(|err| err.with_context(&key))?;
        log::trace!("storing chunk {key} ({} bytes)", encoded.len());
        if let Err(err) = self.store.set(&key, encoded.into()).await {
            self.chunk_cache.invalidate(&self.key, chunk_indices).await;
            return Err(DriverError::storage("writing", key.as_str(), err));
        }
        self.chunk_cache
            .insert(&self.key, chunk_indices, Arc::new(Some(components)))
            .await;
        Ok(())
    }

    /// Erase the chunk at `chunk_indices`.
    pub(crate) async fn erase_chunk(&self, chunk_indices: &[u64]) -> Result<(), DriverError> {
        let _guard = self.locks.lock(chunk_indices).await;
        let key = self.storage_key(chunk_indices)?;
        log::trace!("erasing chunk {key}");
        let result = self.store.erase(&key).await;
        self.chunk_cache.invalidate(&self.key, chunk_indices).await;
        result.map_err(|err| DriverError::storage("erasing", key.as_str(), err))
    }
}
