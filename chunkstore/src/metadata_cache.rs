//! The metadata cache.
//!
//! A [`MetadataCache`] holds one [`MetadataCacheEntry`] per metadata key of a key-value store.
//! Entries are created on first use by reading the stored metadata; concurrent first uses of a key share a single read.
//! Every modification of the stored metadata goes through the entry with a conditional write, so that concurrent writers (in this or another process) do not lose updates.

use std::sync::Arc;

use chunkstore_storage::{
    AsyncReadableWritableStorage, StorageGeneration, StoreKey, WriteCondition,
};
use moka::future::Cache;
use parking_lot::RwLock;

use crate::config::global_config;
use crate::DriverError;

/// Encoding and decoding of stored metadata.
pub trait MetadataFormat: Send + Sync + 'static {
    /// The decoded metadata.
    type Metadata: std::fmt::Debug + Send + Sync + 'static;

    /// Decode stored metadata.
    ///
    /// # Errors
    /// Returns [`ErrorKind::FailedPrecondition`](crate::ErrorKind::FailedPrecondition) if `bytes` are not valid metadata.
    fn decode_metadata(bytes: &[u8]) -> Result<Self::Metadata, DriverError>;

    /// Encode metadata for storage.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the metadata cannot be encoded.
    fn encode_metadata(metadata: &Self::Metadata) -> Result<Vec<u8>, DriverError>;
}

#[derive(Debug)]
struct EntryState<M> {
    metadata: Option<Arc<M>>,
    generation: Option<StorageGeneration>,
}

/// The cached metadata of one key.
///
/// The cached value is an immutable snapshot replaced on every successful read or write.
pub struct MetadataCacheEntry<F: MetadataFormat> {
    store: AsyncReadableWritableStorage,
    key: StoreKey,
    state: RwLock<EntryState<F::Metadata>>,
    update_lock: async_lock::Mutex<()>,
}

impl<F: MetadataFormat> std::fmt::Debug for MetadataCacheEntry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCacheEntry")
            .field("key", &self.key)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl<F: MetadataFormat> MetadataCacheEntry<F> {
    fn new(store: AsyncReadableWritableStorage, key: StoreKey) -> Self {
        Self {
            store,
            key,
            state: RwLock::new(EntryState {
                metadata: None,
                generation: None,
            }),
            update_lock: async_lock::Mutex::new(()),
        }
    }

    /// The metadata key.
    #[must_use]
    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    /// The cached metadata, or [`None`] if the metadata did not exist when last read.
    #[must_use]
    pub fn metadata(&self) -> Option<Arc<F::Metadata>> {
        self.state.read().metadata.clone()
    }

    fn snapshot(&self) -> (Option<Arc<F::Metadata>>, Option<StorageGeneration>) {
        let state = self.state.read();
        (state.metadata.clone(), state.generation)
    }

    fn store_state(
        &self,
        metadata: Option<Arc<F::Metadata>>,
        generation: Option<StorageGeneration>,
    ) {
        *self.state.write() = EntryState {
            metadata,
            generation,
        };
    }

    async fn read_unlocked(&self) -> Result<Option<Arc<F::Metadata>>, DriverError> {
        let versioned = self
            .store
            .get_versioned(&self.key)
            .await
            .map_err(|err| DriverError::storage("reading", self.key.as_str(), err))?;
        let metadata = match &versioned.value {
            Some(bytes) => Some(Arc::new(
                F::decode_metadata(bytes).map_err(|err| err.with_context(&self.key))?,
            )),
            None => None,
        };
        log::trace!(
            "read metadata {} (generation {:?})",
            self.key,
            versioned.generation
        );
        self.store_state(metadata.clone(), versioned.generation);
        Ok(metadata)
    }

    /// Re-read the stored metadata.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the read fails or the stored metadata cannot be decoded.
    pub async fn refresh(&self) -> Result<Option<Arc<F::Metadata>>, DriverError> {
        let _guard = self.update_lock.lock().await;
        self.read_unlocked().await
    }

    /// Return the cached metadata, creating it with `create` if it does not exist.
    ///
    /// The metadata is written only if the key does not exist.
    /// If another writer creates the metadata first, the stored metadata is returned instead of `create` output.
    ///
    /// # Errors
    /// Returns [`ErrorKind::AlreadyExists`](crate::ErrorKind::AlreadyExists) if `exclusive` and the metadata exists.
    /// Returns the error of `create`, or a [`DriverError`] if the write fails.
    pub async fn get_or_create(
        &self,
        create: impl FnOnce() -> Result<F::Metadata, DriverError>,
        exclusive: bool,
    ) -> Result<Arc<F::Metadata>, DriverError> {
        let _guard = self.update_lock.lock().await;
        if let Some(existing) = self.metadata() {
            return self.existing_or_error(existing, exclusive);
        }

        let metadata = create()?;
        let bytes = F::encode_metadata(&metadata)?;
        let written = self
            .store
            .set_if(&self.key, bytes.into(), WriteCondition::IfNotExists)
            .await
            .map_err(|err| DriverError::storage("writing", self.key.as_str(), err))?;
        if let Some(generation) = written {
            log::debug!("created metadata {}", self.key);
            let metadata = Arc::new(metadata);
            self.store_state(Some(metadata.clone()), Some(generation));
            return Ok(metadata);
        }

        log::debug!("metadata {} was created concurrently", self.key);
        match self.read_unlocked().await? {
            Some(existing) => self.existing_or_error(existing, exclusive),
            None => Err(DriverError::aborted(format!(
                "metadata {} was created and deleted concurrently",
                self.key
            ))),
        }
    }

    fn existing_or_error(
        &self,
        existing: Arc<F::Metadata>,
        exclusive: bool,
    ) -> Result<Arc<F::Metadata>, DriverError> {
        if exclusive {
            Err(DriverError::already_exists(format!(
                "metadata {} already exists",
                self.key
            )))
        } else {
            Ok(existing)
        }
    }

    /// Atomically replace the stored metadata with `transform` of the current metadata.
    ///
    /// The first attempt transforms the cached metadata; after a conflicting write the metadata is re-read and `transform` is applied again.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) if the metadata does not exist, the error of `transform`, or [`ErrorKind::Aborted`](crate::ErrorKind::Aborted) after the configured number of conflicting attempts.
    pub async fn update(
        &self,
        mut transform: impl FnMut(&F::Metadata) -> Result<F::Metadata, DriverError>,
    ) -> Result<Arc<F::Metadata>, DriverError> {
        let _guard = self.update_lock.lock().await;
        let max_attempts = global_config().metadata_update_max_attempts();
        let (mut metadata, mut generation) = self.snapshot();
        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.read_unlocked().await?;
                (metadata, generation) = self.snapshot();
            }
            let Some(existing) = &metadata else {
                return Err(DriverError::not_found(format!(
                    "metadata {} does not exist",
                    self.key
                )));
            };
            let updated = transform(existing)?;
            let bytes = F::encode_metadata(&updated)?;
            let written = self
                .store
                .set_if(&self.key, bytes.into(), WriteCondition::matching(generation))
                .await
                .map_err(|err| DriverError::storage("writing", self.key.as_str(), err))?;
            if let Some(new_generation) = written {
                let updated = Arc::new(updated);
                self.store_state(Some(updated.clone()), Some(new_generation));
                return Ok(updated);
            }
            log::debug!(
                "conflicting update of metadata {} (attempt {})",
                self.key,
                attempt + 1
            );
        }
        Err(DriverError::aborted(format!(
            "metadata {} update conflicted {max_attempts} times",
            self.key
        )))
    }
}

/// A cache of the metadata stored in one key-value store.
pub struct MetadataCache<F: MetadataFormat> {
    store: AsyncReadableWritableStorage,
    entries: Cache<String, Arc<MetadataCacheEntry<F>>>,
}

impl<F: MetadataFormat> std::fmt::Debug for MetadataCache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entries", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}

impl<F: MetadataFormat> MetadataCache<F> {
    /// Create a new metadata cache for `store`.
    #[must_use]
    pub fn new(store: AsyncReadableWritableStorage) -> Self {
        Self {
            store,
            entries: Cache::builder().build(),
        }
    }

    /// Return the entry for `key`, reading the stored metadata if the entry is new.
    ///
    /// The second element of the result is true if this call created the entry.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the initial read fails. A failed read does not create an entry.
    pub async fn entry(
        &self,
        key: &StoreKey,
    ) -> Result<(Arc<MetadataCacheEntry<F>>, bool), DriverError> {
        let entry = self
            .entries
            .entry(key.as_str().to_string())
            .or_try_insert_with(async {
                let entry = MetadataCacheEntry::new(self.store.clone(), key.clone());
                entry.read_unlocked().await?;
                Ok::<_, DriverError>(Arc::new(entry))
            })
            .await
            .map_err(|err: Arc<DriverError>| (*err).clone())?;
        let fresh = entry.is_fresh();
        Ok((entry.into_value(), fresh))
    }
}
