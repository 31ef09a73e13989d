//! The key-value storage API for the `chunkstore` crate.
//!
//! A store maps [`StoreKey`]s to byte values.
//! Every stored value carries a [`StorageGeneration`], an opaque token that changes whenever the value is written.
//! Writes may be made conditional on the generation observed by an earlier read ([`WriteCondition`]), which is the building block for optimistic concurrency control.
//!
//! This crate includes an in-memory store implementation, [`store::MemoryStore`].

mod storage_async;
pub mod store;
mod store_key;
mod store_prefix;

use std::sync::Arc;

use thiserror::Error;

pub use store_key::{StoreKey, StoreKeyError, StoreKeys};
pub use store_prefix::{StorePrefix, StorePrefixError};

pub use self::storage_async::AsyncReadableWritableStorageTraits;

/// [`Arc`] wrapped asynchronous readable and writable storage.
pub type AsyncReadableWritableStorage = Arc<dyn AsyncReadableWritableStorageTraits>;

/// The type for bytes used in store set and get methods.
///
/// An alias for [`bytes::Bytes`].
pub type Bytes = bytes::Bytes;

/// An alias for bytes which may or may not be available.
///
/// When a value is read from a store, it returns `MaybeBytes` which is [`None`] if the key is not available.
pub type MaybeBytes = Option<Bytes>;

/// An opaque token identifying a specific revision of a stored value.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, derive_more::Display)]
#[display("{_0}")]
pub struct StorageGeneration(u64);

impl StorageGeneration {
    /// Create a generation from its raw value.
    #[must_use]
    pub const fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Return the raw generation value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// The result of a versioned read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedBytes {
    /// The value, or [`None`] if the key does not exist.
    pub value: MaybeBytes,
    /// The generation of the value, or [`None`] if the key does not exist.
    pub generation: Option<StorageGeneration>,
}

impl VersionedBytes {
    /// A read of a missing key.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            value: None,
            generation: None,
        }
    }
}

/// A precondition for a write.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum WriteCondition {
    /// Always write.
    #[default]
    Unconditional,
    /// Write only if the current value has the given generation.
    IfGenerationMatches(StorageGeneration),
    /// Write only if the key does not exist.
    IfNotExists,
}

impl WriteCondition {
    /// Create a condition matching a previously observed generation.
    ///
    /// A missing value ([`None`]) becomes [`WriteCondition::IfNotExists`].
    #[must_use]
    pub fn matching(generation: Option<StorageGeneration>) -> Self {
        generation.map_or(Self::IfNotExists, Self::IfGenerationMatches)
    }

    /// Returns true if a value with `generation` satisfies the condition.
    #[must_use]
    pub fn is_satisfied_by(&self, generation: Option<StorageGeneration>) -> bool {
        match self {
            Self::Unconditional => true,
            Self::IfGenerationMatches(expected) => generation == Some(*expected),
            Self::IfNotExists => generation.is_none(),
        }
    }
}

/// A storage error.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// A write operation was attempted on a read only store.
    #[error("a write operation was attempted on a read only store")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
    /// An invalid store prefix.
    #[error(transparent)]
    StorePrefixError(#[from] StorePrefixError),
    /// An invalid store key.
    #[error(transparent)]
    InvalidStoreKey(#[from] StoreKeyError),
    /// The requested method is not supported.
    #[error("{0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_condition() {
        let generation = StorageGeneration::new(3);
        assert!(WriteCondition::Unconditional.is_satisfied_by(None));
        assert!(WriteCondition::Unconditional.is_satisfied_by(Some(generation)));
        assert!(WriteCondition::IfNotExists.is_satisfied_by(None));
        assert!(!WriteCondition::IfNotExists.is_satisfied_by(Some(generation)));
        assert!(WriteCondition::IfGenerationMatches(generation).is_satisfied_by(Some(generation)));
        assert!(!WriteCondition::IfGenerationMatches(generation)
            .is_satisfied_by(Some(StorageGeneration::new(4))));
        assert!(!WriteCondition::IfGenerationMatches(generation).is_satisfied_by(None));
        assert_eq!(WriteCondition::matching(None), WriteCondition::IfNotExists);
    }
}
