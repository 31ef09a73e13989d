use auto_impl::auto_impl;

use super::{
    Bytes, MaybeBytes, StorageError, StorageGeneration, StoreKey, StoreKeys, StorePrefix,
    VersionedBytes, WriteCondition,
};

/// Async readable and writable storage traits.
#[async_trait::async_trait]
#[auto_impl(Arc)]
pub trait AsyncReadableWritableStorageTraits: Send + Sync {
    /// Retrieve the value (bytes) associated with a given [`StoreKey`] together with its generation.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn get_versioned(&self, key: &StoreKey) -> Result<VersionedBytes, StorageError>;

    /// Retrieve the value (bytes) associated with a given [`StoreKey`].
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        Ok(self.get_versioned(key).await?.value)
    }

    /// Store bytes at a [`StoreKey`] if `condition` holds for the current value.
    ///
    /// Returns the generation of the written value, or [`None`] if the condition was not satisfied and nothing was written.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on failure to store.
    async fn set_if(
        &self,
        key: &StoreKey,
        value: Bytes,
        condition: WriteCondition,
    ) -> Result<Option<StorageGeneration>, StorageError>;

    /// Store bytes at a [`StoreKey`].
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on failure to store.
    async fn set(&self, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        self.set_if(key, value, WriteCondition::Unconditional)
            .await
            .map(|_| ())
    }

    /// Erase a [`StoreKey`].
    ///
    /// Succeeds if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn erase(&self, key: &StoreKey) -> Result<(), StorageError>;

    /// Erase all [`StoreKey`]s under [`StorePrefix`].
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn erase_prefix(&self, prefix: &StorePrefix) -> Result<(), StorageError>;

    /// Retrieve all [`StoreKeys`] with a given [`StorePrefix`].
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying error with the store.
    async fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError>;
}
