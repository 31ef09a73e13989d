//! `chunkstore` global configuration options.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for the `chunkstore` crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with [`global_config_mut`].
///
/// ## Metadata Update Max Attempts
/// > default: `16`
///
/// The number of read-modify-write attempts of a metadata update (e.g. a resize) before it fails with [`ErrorKind::Aborted`](crate::ErrorKind::Aborted).
///
/// ## Chunk Lock Stripes
/// > default: `64`
///
/// The number of locks that serialize read-modify-write of chunks within one data cache.
/// Chunks are assigned to a lock by a hash of their indices.
///
/// ## Cache Pool Total Bytes Limit
/// > default: `0`
///
/// The chunk cache capacity in bytes of a `cache_pool` context resource that does not specify `total_bytes_limit`.
/// Decoded chunks are not retained if zero.
///
/// ## Data Copy Concurrency
/// > default: [`std::thread::available_parallelism`]`()`
///
/// The concurrent limit of a `data_copy_concurrency` context resource that specifies `"shared"` or nothing.
#[derive(Debug)]
pub struct Config {
    metadata_update_max_attempts: usize,
    chunk_lock_stripes: usize,
    cache_pool_total_bytes_limit: u64,
    data_copy_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_update_max_attempts: 16,
            chunk_lock_stripes: 64,
            cache_pool_total_bytes_limit: 0,
            data_copy_concurrency: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl Config {
    /// Get the [metadata update max attempts](#metadata-update-max-attempts) configuration.
    #[must_use]
    pub fn metadata_update_max_attempts(&self) -> usize {
        self.metadata_update_max_attempts
    }

    /// Set the [metadata update max attempts](#metadata-update-max-attempts) configuration.
    pub fn set_metadata_update_max_attempts(&mut self, attempts: usize) -> &mut Self {
        self.metadata_update_max_attempts = attempts.max(1);
        self
    }

    /// Get the [chunk lock stripes](#chunk-lock-stripes) configuration.
    #[must_use]
    pub fn chunk_lock_stripes(&self) -> usize {
        self.chunk_lock_stripes
    }

    /// Set the [chunk lock stripes](#chunk-lock-stripes) configuration.
    pub fn set_chunk_lock_stripes(&mut self, stripes: usize) -> &mut Self {
        self.chunk_lock_stripes = stripes.max(1);
        self
    }

    /// Get the [cache pool total bytes limit](#cache-pool-total-bytes-limit) configuration.
    #[must_use]
    pub fn cache_pool_total_bytes_limit(&self) -> u64 {
        self.cache_pool_total_bytes_limit
    }

    /// Set the [cache pool total bytes limit](#cache-pool-total-bytes-limit) configuration.
    pub fn set_cache_pool_total_bytes_limit(&mut self, total_bytes_limit: u64) -> &mut Self {
        self.cache_pool_total_bytes_limit = total_bytes_limit;
        self
    }

    /// Get the [data copy concurrency](#data-copy-concurrency) configuration.
    #[must_use]
    pub fn data_copy_concurrency(&self) -> usize {
        self.data_copy_concurrency
    }

    /// Set the [data copy concurrency](#data-copy-concurrency) configuration.
    pub fn set_data_copy_concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.data_copy_concurrency = concurrency.max(1);
        self
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global `chunkstore` configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global `chunkstore` configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn config_metadata_update_max_attempts() {
        assert_eq!(global_config().metadata_update_max_attempts(), 16);
        global_config_mut().set_metadata_update_max_attempts(2);
        assert_eq!(global_config().metadata_update_max_attempts(), 2);
        global_config_mut().set_metadata_update_max_attempts(16);
    }

    #[test]
    #[serial_test::serial]
    fn config_chunk_lock_stripes() {
        global_config_mut().set_chunk_lock_stripes(0);
        assert_eq!(global_config().chunk_lock_stripes(), 1);
        global_config_mut().set_chunk_lock_stripes(64);
    }
}
