//! Chunk compressors.
//!
//! A compressor is identified by the `id` of its [`MetadataV2`], e.g. `{"id": "zlib", "level": 1}`.
//! Compressors are plugins registered with [`inventory::submit`] as a [`CompressorPlugin`] or at runtime with [`register_compressor`].
//!
//! | id     | feature | configuration       |
//! |--------|---------|---------------------|
//! | `zlib` | `zlib`  | `level` (0-9, default 1) |
//! | `gzip` | `gzip`  | `level` (0-9, default 1) |
//! | `zstd` | `zstd`  | `level` (default 1) |

#[cfg(any(feature = "gzip", feature = "zlib"))]
mod deflate;
#[cfg(feature = "zstd")]
mod zstd;

use std::sync::Arc;

use chunkstore_metadata::v2::MetadataV2;
use chunkstore_plugin::{Plugin, PluginCreateError, PluginIdentifier, Registry};
use thiserror::Error;

/// A compressor error.
#[derive(Clone, Debug, Error)]
pub enum CompressorError {
    /// An IO error from the underlying compression library.
    #[error("{0}")]
    IOError(String),
}

impl From<std::io::Error> for CompressorError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err.to_string())
    }
}

/// Traits for a compressor.
pub trait CompressorTraits: std::fmt::Debug + Send + Sync {
    /// Compress `decoded`.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if compression fails.
    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError>;

    /// Decompress `encoded`. `decoded_size_hint` is the expected decompressed size.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if `encoded` is not valid compressed data.
    fn decode(&self, encoded: &[u8], decoded_size_hint: usize)
        -> Result<Vec<u8>, CompressorError>;
}

/// A compressor.
pub type Compressor = Arc<dyn CompressorTraits>;

/// A compressor plugin.
pub struct CompressorPlugin(Plugin<Compressor, MetadataV2>);
inventory::collect!(CompressorPlugin);

impl CompressorPlugin {
    /// Create a new compressor plugin.
    pub const fn new(
        identifier: &'static str,
        create_fn: fn(&MetadataV2) -> Result<Compressor, PluginCreateError>,
    ) -> Self {
        Self(Plugin::new(identifier, create_fn))
    }
}

impl PluginIdentifier for CompressorPlugin {
    fn identifier(&self) -> &'static str {
        self.0.identifier()
    }
}

static COMPRESSORS: Registry<CompressorPlugin> = Registry::new("compressor");

/// Register a compressor at runtime.
///
/// # Panics
/// Panics if a compressor with the same identifier is already registered.
pub fn register_compressor(plugin: CompressorPlugin) {
    COMPRESSORS.register(plugin);
}

/// Create a compressor from its metadata.
///
/// # Errors
/// Returns a [`PluginCreateError`] if the compressor is not registered or its configuration is invalid.
pub fn create_compressor(metadata: &MetadataV2) -> Result<Compressor, PluginCreateError> {
    let plugin = COMPRESSORS.get(metadata.id()).ok_or_else(|| {
        chunkstore_plugin::PluginUnsupportedError::new(
            metadata.id().to_string(),
            "compressor".to_string(),
        )
    })?;
    plugin.0.create(metadata)
}

/// The identifiers of the registered compressors.
#[must_use]
pub fn compressor_identifiers() -> Vec<&'static str> {
    COMPRESSORS.identifiers()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn compressor_unknown() {
        let metadata: MetadataV2 = serde_json::from_value(json!({"id": "lz5"})).unwrap();
        assert!(matches!(
            create_compressor(&metadata),
            Err(PluginCreateError::Unsupported(_))
        ));
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn compressor_registered() {
        assert!(compressor_identifiers().contains(&"zlib"));
    }
}
