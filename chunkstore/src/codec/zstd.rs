//! The `zstd` compressor.

use std::sync::Arc;

use chunkstore_metadata::v2::MetadataV2;
use chunkstore_plugin::{PluginConfigurationInvalidError, PluginCreateError};
use serde::Deserialize;

use super::{Compressor, CompressorError, CompressorPlugin, CompressorTraits};

#[derive(Deserialize, Debug)]
struct ZstdConfiguration {
    #[serde(default = "default_level")]
    level: i32,
}

const fn default_level() -> i32 {
    1
}

/// The `zstd` compressor.
#[derive(Debug)]
pub struct ZstdCompressor {
    level: i32,
}

inventory::submit! {
    CompressorPlugin::new("zstd", create_zstd)
}

fn create_zstd(metadata: &MetadataV2) -> Result<Compressor, PluginCreateError> {
    let configuration: ZstdConfiguration =
        serde_json::from_value(serde_json::Value::Object(metadata.configuration().clone()))
            .map_err(|err| PluginConfigurationInvalidError::new(format!("{metadata:?}: {err}")))?;
    if !::zstd::compression_level_range().contains(&configuration.level) {
        return Err(PluginConfigurationInvalidError::new(format!(
            "zstd level {} is out of range",
            configuration.level
        ))
        .into());
    }
    Ok(Arc::new(ZstdCompressor {
        level: configuration.level,
    }))
}

impl CompressorTraits for ZstdCompressor {
    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        Ok(::zstd::encode_all(decoded, self.level)?)
    }

    fn decode(
        &self,
        encoded: &[u8],
        _decoded_size_hint: usize,
    ) -> Result<Vec<u8>, CompressorError> {
        Ok(::zstd::decode_all(encoded)?)
    }
}
