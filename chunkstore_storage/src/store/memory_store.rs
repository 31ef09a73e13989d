//! An asynchronous in-memory store.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{
    AsyncReadableWritableStorageTraits, Bytes, StorageError, StorageGeneration, StoreKey,
    StoreKeys, StorePrefix, VersionedBytes, WriteCondition,
};

#[derive(Debug, Default)]
struct MemoryStoreData {
    values: BTreeMap<StoreKey, (Bytes, StorageGeneration)>,
    next_generation: u64,
}

/// An in-memory store.
///
/// Each write assigns the value a fresh generation from a store-wide counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<MemoryStoreData>,
}

impl MemoryStore {
    /// Create a new memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().values.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().values.is_empty()
    }
}

#[async_trait::async_trait]
impl AsyncReadableWritableStorageTraits for MemoryStore {
    async fn get_versioned(&self, key: &StoreKey) -> Result<VersionedBytes, StorageError> {
        let data = self.data.lock();
        Ok(data
            .values
            .get(key)
            .map_or_else(VersionedBytes::missing, |(value, generation)| {
                VersionedBytes {
                    value: Some(value.clone()),
                    generation: Some(*generation),
                }
            }))
    }

    async fn set_if(
        &self,
        key: &StoreKey,
        value: Bytes,
        condition: WriteCondition,
    ) -> Result<Option<StorageGeneration>, StorageError> {
        let mut data = self.data.lock();
        let current = data.values.get(key).map(|(_, generation)| *generation);
        if !condition.is_satisfied_by(current) {
            return Ok(None);
        }
        data.next_generation += 1;
        let generation = StorageGeneration::new(data.next_generation);
        data.values.insert(key.clone(), (value, generation));
        Ok(Some(generation))
    }

    async fn erase(&self, key: &StoreKey) -> Result<(), StorageError> {
        self.data.lock().values.remove(key);
        Ok(())
    }

    async fn erase_prefix(&self, prefix: &StorePrefix) -> Result<(), StorageError> {
        self.data
            .lock()
            .values
            .retain(|key, _| !key.has_prefix(prefix));
        Ok(())
    }

    async fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        let data = self.data.lock();
        Ok(data
            .values
            .keys()
            .filter(|key| key.has_prefix(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::Arc;

    use super::*;
    use crate::AsyncReadableWritableStorage;

    #[tokio::test]
    async fn memory_set_get_erase() -> Result<(), Box<dyn Error>> {
        let store: AsyncReadableWritableStorage = Arc::new(MemoryStore::new());
        let key = StoreKey::new("a/b")?;
        assert!(store.get(&key).await?.is_none());
        store.set(&key, Bytes::from_static(&[0, 1, 2])).await?;
        assert_eq!(store.get(&key).await?.unwrap(), vec![0, 1, 2]);

        store.set(&StoreKey::new("a/c")?, Bytes::new()).await?;
        store.set(&StoreKey::new("b")?, Bytes::new()).await?;
        assert_eq!(
            store.list_prefix(&StorePrefix::new("a/")?).await?,
            vec![StoreKey::new("a/b")?, StoreKey::new("a/c")?]
        );

        store.erase_prefix(&StorePrefix::new("a/")?).await?;
        assert!(store.get(&key).await?.is_none());
        assert!(store.get(&StoreKey::new("b")?).await?.is_some());
        store.erase(&StoreKey::new("b")?).await?;
        store.erase(&StoreKey::new("b")?).await?;
        assert!(store
            .list_prefix(&StorePrefix::root())
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn memory_conditional_writes() -> Result<(), Box<dyn Error>> {
        let store = MemoryStore::new();
        let key = StoreKey::new("k")?;

        let first = store
            .set_if(&key, Bytes::from_static(b"1"), WriteCondition::IfNotExists)
            .await?
            .expect("written");
        assert!(store
            .set_if(&key, Bytes::from_static(b"x"), WriteCondition::IfNotExists)
            .await?
            .is_none());

        let second = store
            .set_if(
                &key,
                Bytes::from_static(b"2"),
                WriteCondition::IfGenerationMatches(first),
            )
            .await?
            .expect("written");
        assert_ne!(first, second);

        // A stale generation is rejected and leaves the value untouched.
        assert!(store
            .set_if(
                &key,
                Bytes::from_static(b"3"),
                WriteCondition::IfGenerationMatches(first),
            )
            .await?
            .is_none());
        let read = store.get_versioned(&key).await?;
        assert_eq!(read.value.unwrap(), Bytes::from_static(b"2"));
        assert_eq!(read.generation, Some(second));
        Ok(())
    }
}
