//! The chunk cache.
//!
//! Decoded chunks are held as immutable [`ChunkSnapshot`]s keyed by data cache and chunk indices, in a cache bounded by the byte limit of the owning [`CachePool`](crate::context::CachePool).
//! Read-modify-write of a chunk is serialized by [`ChunkLocks`]: a fixed set of async mutexes that chunks are assigned to by a hash of their indices.
//! A writer replaces the snapshot in the cache after the store write completes, so readers observe either the previous or the new content of a chunk.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use chunkstore_chunk_grid::{ArrayIndices, SharedArray};
use moka::future::Cache;

/// The decoded contents of a chunk: one array per component, or [`None`] if the chunk is not stored.
pub(crate) type ChunkSnapshot = Arc<Option<Vec<SharedArray>>>;

type ChunkCacheKey = (Arc<str>, ArrayIndices);

fn snapshot_weight(snapshot: &ChunkSnapshot) -> u32 {
    let bytes: usize = snapshot
        .as_ref()
        .as_ref()
        .map_or(0, |components| components.iter().map(|c| c.as_bytes().len()).sum());
    u32::try_from(bytes).unwrap_or(u32::MAX).max(1)
}

/// A byte-bounded cache of decoded chunks shared by all data caches of a pool.
///
/// Clones share the same cache.
#[derive(Clone)]
pub(crate) struct ChunkCache {
    cache: Cache<ChunkCacheKey, ChunkSnapshot>,
}

impl ChunkCache {
    pub(crate) fn new(total_bytes_limit: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(total_bytes_limit)
                .weigher(|_key: &ChunkCacheKey, snapshot: &ChunkSnapshot| {
                    snapshot_weight(snapshot)
                })
                .build(),
        }
    }

    pub(crate) async fn get(
        &self,
        data_cache_key: &Arc<str>,
        chunk_indices: &[u64],
    ) -> Option<ChunkSnapshot> {
        self.cache
            .get(&(data_cache_key.clone(), chunk_indices.to_vec()))
            .await
    }

    pub(crate) async fn insert(
        &self,
        data_cache_key: &Arc<str>,
        chunk_indices: &[u64],
        snapshot: ChunkSnapshot,
    ) {
        self.cache
            .insert((data_cache_key.clone(), chunk_indices.to_vec()), snapshot)
            .await;
    }

    pub(crate) async fn invalidate(&self, data_cache_key: &Arc<str>, chunk_indices: &[u64]) {
        self.cache
            .invalidate(&(data_cache_key.clone(), chunk_indices.to_vec()))
            .await;
    }

    pub(crate) fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Locks serializing read-modify-write of chunks.
pub(crate) struct ChunkLocks {
    stripes: Vec<async_lock::Mutex<()>>,
}

impl ChunkLocks {
    pub(crate) fn new(num_stripes: usize) -> Self {
        Self {
            stripes: (0..num_stripes.max(1))
                .map(|_| async_lock::Mutex::new(()))
                .collect(),
        }
    }

    pub(crate) async fn lock(&self, chunk_indices: &[u64]) -> async_lock::MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        chunk_indices.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe].lock().await
    }
}
