//! The `zlib` and `gzip` compressors.

use std::io::{Cursor, Read};
use std::sync::Arc;

use chunkstore_metadata::v2::MetadataV2;
use chunkstore_plugin::{PluginConfigurationInvalidError, PluginCreateError};
use serde::Deserialize;

use super::{Compressor, CompressorError, CompressorPlugin, CompressorTraits};

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct DeflateConfiguration {
    #[serde(default = "default_level")]
    level: u32,
}

const fn default_level() -> u32 {
    1
}

fn parse_level(metadata: &MetadataV2) -> Result<flate2::Compression, PluginCreateError> {
    let configuration: DeflateConfiguration =
        serde_json::from_value(serde_json::Value::Object(metadata.configuration().clone()))
            .map_err(|err| PluginConfigurationInvalidError::new(format!("{metadata:?}: {err}")))?;
    if configuration.level > 9 {
        return Err(PluginConfigurationInvalidError::new(format!(
            "{:?} level must be between 0 and 9, got {}",
            metadata.id(),
            configuration.level
        ))
        .into());
    }
    Ok(flate2::Compression::new(configuration.level))
}

/// The `zlib` compressor.
#[cfg(feature = "zlib")]
#[derive(Debug)]
pub struct ZlibCompressor {
    level: flate2::Compression,
}

#[cfg(feature = "zlib")]
inventory::submit! {
    CompressorPlugin::new("zlib", create_zlib)
}

#[cfg(feature = "zlib")]
fn create_zlib(metadata: &MetadataV2) -> Result<Compressor, PluginCreateError> {
    Ok(Arc::new(ZlibCompressor {
        level: parse_level(metadata)?,
    }))
}

#[cfg(feature = "zlib")]
impl CompressorTraits for ZlibCompressor {
    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let mut encoder = flate2::bufread::ZlibEncoder::new(Cursor::new(decoded), self.level);
        let mut out = Vec::new();
        encoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn decode(
        &self,
        encoded: &[u8],
        decoded_size_hint: usize,
    ) -> Result<Vec<u8>, CompressorError> {
        let mut decoder = flate2::bufread::ZlibDecoder::new(Cursor::new(encoded));
        let mut out = Vec::with_capacity(decoded_size_hint);
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// The `gzip` compressor.
#[cfg(feature = "gzip")]
#[derive(Debug)]
pub struct GzipCompressor {
    level: flate2::Compression,
}

#[cfg(feature = "gzip")]
inventory::submit! {
    CompressorPlugin::new("gzip", create_gzip)
}

#[cfg(feature = "gzip")]
fn create_gzip(metadata: &MetadataV2) -> Result<Compressor, PluginCreateError> {
    Ok(Arc::new(GzipCompressor {
        level: parse_level(metadata)?,
    }))
}

#[cfg(feature = "gzip")]
impl CompressorTraits for GzipCompressor {
    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let mut encoder = flate2::bufread::GzEncoder::new(Cursor::new(decoded), self.level);
        let mut out = Vec::new();
        encoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn decode(
        &self,
        encoded: &[u8],
        decoded_size_hint: usize,
    ) -> Result<Vec<u8>, CompressorError> {
        let mut decoder = flate2::bufread::GzDecoder::new(Cursor::new(encoded));
        let mut out = Vec::with_capacity(decoded_size_hint);
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::create_compressor;
    use super::*;

    fn round_trip(json: serde_json::Value) {
        let metadata: MetadataV2 = serde_json::from_value(json).unwrap();
        let compressor = create_compressor(&metadata).unwrap();
        let bytes: Vec<u8> = (0..255).cycle().take(4096).collect();
        let encoded = compressor.encode(&bytes).unwrap();
        assert!(encoded.len() < bytes.len());
        assert_eq!(compressor.decode(&encoded, bytes.len()).unwrap(), bytes);
        assert!(compressor.decode(&bytes[..16], bytes.len()).is_err());
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn compressor_zlib() {
        round_trip(json!({"id": "zlib", "level": 5}));
        round_trip(json!({"id": "zlib"}));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn compressor_gzip() {
        round_trip(json!({"id": "gzip", "level": 9}));
    }

    #[cfg(all(feature = "zlib", feature = "gzip"))]
    #[test]
    fn compressor_deflate_invalid_level() {
        for id in ["zlib", "gzip"] {
            let metadata: MetadataV2 =
                serde_json::from_value(json!({"id": id, "level": 10})).unwrap();
            assert!(matches!(
                create_compressor(&metadata),
                Err(PluginCreateError::ConfigurationInvalid(_))
            ));
        }
    }
}
