//! The `zarr` driver: Zarr V2 arrays stored in a key-value store.
//!
//! ```json
//! {
//!     "driver": "zarr",
//!     "kvstore": {"driver": "memory"},
//!     "path": "a/",
//!     "metadata": {
//!         "shape": [100, 100],
//!         "chunks": [10, 10],
//!         "dtype": [["x", "<u2"], ["y", ">f4", [3]]],
//!         "compressor": {"id": "zlib", "level": 1},
//!         "dimension_separator": "/"
//!     },
//!     "field": "y",
//!     "create": true
//! }
//! ```
//!
//! `metadata` holds constraints on the `.zarray` metadata: on open every member that is present must match the stored metadata, and on create the members (together with the schema) determine the new metadata.
//! `field` selects a field of a structured `dtype`; the trailing dimensions of the field (its shape followed by the length of an `S` or `V` type) are appended to the chunked dimensions.
//! The deprecated `key_encoding` member is accepted as an alias of `metadata.dimension_separator`.

mod data_cache;
mod spec;

use std::sync::Arc;

use chunkstore_metadata::v2::{MetadataV2, ZarrMetadata, ZarrPartialMetadata, ZARR_METADATA_KEY};
use chunkstore_plugin::PluginCreateError;
use serde_json::{Map, Value};

pub use data_cache::ZarrDataCache;
pub use spec::ZarrSpecData;

use crate::cache_key::CacheKeyEncoder;
use crate::codec::{create_compressor, Compressor};
use crate::kvs_backed_chunk_driver::{KvsBackedFormat, KvsSpec};
use crate::metadata_cache::MetadataFormat;
use crate::schema::Schema;
use crate::spec::{DriverPlugin, DriverSpecTraits};
use crate::DriverError;

/// The Zarr V2 format.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZarrFormat;

/// The specification of a Zarr V2 array.
pub type ZarrSpec = KvsSpec<ZarrFormat>;

inventory::submit! {
    DriverPlugin::new(<ZarrFormat as KvsBackedFormat>::ID, create_zarr_spec)
}

fn create_zarr_spec(
    members: &Map<String, Value>,
) -> Result<Arc<dyn DriverSpecTraits>, PluginCreateError> {
    Ok(Arc::new(
        ZarrSpec::from_json(members).map_err(|err| PluginCreateError::Other(err.to_string()))?,
    ))
}

/// Create the compressor described by `metadata`.
fn compressor(metadata: &MetadataV2) -> Result<Compressor, DriverError> {
    create_compressor(metadata).map_err(|err| match err {
        PluginCreateError::Unsupported(_) => DriverError::unimplemented(err.to_string()),
        err => DriverError::invalid_argument(format!(
            "invalid compressor {}: {err}",
            serde_json::to_string(metadata).unwrap_or_default()
        )),
    })
}

impl MetadataFormat for ZarrFormat {
    type Metadata = ZarrMetadata;

    fn decode_metadata(bytes: &[u8]) -> Result<ZarrMetadata, DriverError> {
        serde_json::from_slice(bytes).map_err(|err| {
            DriverError::failed_precondition(format!("error decoding zarr metadata: {err}"))
        })
    }

    fn encode_metadata(metadata: &ZarrMetadata) -> Result<Vec<u8>, DriverError> {
        serde_json::to_vec_pretty(metadata)
            .map_err(|err| DriverError::internal(format!("error encoding zarr metadata: {err}")))
    }
}

impl KvsBackedFormat for ZarrFormat {
    const ID: &'static str = "zarr";

    type SpecData = ZarrSpecData;

    type DataCache = ZarrDataCache;

    fn spec_data_from_json(members: &mut Map<String, Value>) -> Result<ZarrSpecData, DriverError> {
        ZarrSpecData::from_json(members)
    }

    fn spec_data_to_json(data: &ZarrSpecData, members: &mut Map<String, Value>) {
        data.to_json(members);
    }

    fn apply_options(
        data: &mut ZarrSpecData,
        schema: &Schema,
        minimal_spec: bool,
    ) -> Result<(), DriverError> {
        data.validate_schema(schema)?;
        if minimal_spec {
            data.partial_metadata = ZarrPartialMetadata::default();
        }
        Ok(())
    }

    fn encode_spec_cache_key(data: &ZarrSpecData, encoder: &mut CacheKeyEncoder) {
        data.encode_cache_key(encoder);
    }

    fn metadata_key(key_prefix: &str) -> String {
        format!("{key_prefix}{ZARR_METADATA_KEY}")
    }

    fn create_metadata(data: &ZarrSpecData, schema: &Schema) -> Result<ZarrMetadata, DriverError> {
        data.create_metadata(schema)
    }

    fn validate_metadata(data: &ZarrSpecData, metadata: &ZarrMetadata) -> Result<(), DriverError> {
        data.partial_metadata
            .validate_metadata(metadata)
            .map_err(|err| DriverError::failed_precondition(err.to_string()))
    }

    fn component_index(data: &ZarrSpecData, metadata: &ZarrMetadata) -> Result<usize, DriverError> {
        spec::select_field(&metadata.dtype, &data.field)
    }

    fn validate_schema(
        schema: &Schema,
        metadata: &ZarrMetadata,
        component_index: usize,
    ) -> Result<(), DriverError> {
        spec::validate_schema_against_metadata(schema, metadata, component_index)
    }

    fn encode_data_cache_key(
        data: &ZarrSpecData,
        key_prefix: &str,
        metadata: &ZarrMetadata,
        encoder: &mut CacheKeyEncoder,
    ) {
        let separator = data.dimension_separator(metadata);
        encoder
            .encode(key_prefix)
            .encode(separator.as_str())
            .encode(&data_cache::compatibility_json(metadata, separator));
    }

    fn make_data_cache(
        data: &ZarrSpecData,
        key_prefix: &str,
        metadata: &ZarrMetadata,
    ) -> Result<ZarrDataCache, DriverError> {
        ZarrDataCache::new(key_prefix, metadata, data.dimension_separator(metadata))
    }

    fn bound_spec_data(
        data: &ZarrSpecData,
        metadata: &ZarrMetadata,
        component_index: usize,
    ) -> ZarrSpecData {
        let mut partial_metadata = ZarrPartialMetadata::from_metadata(metadata);
        partial_metadata.dimension_separator = Some(data.dimension_separator(metadata));
        ZarrSpecData {
            partial_metadata,
            field: metadata
                .dtype
                .fields
                .get(component_index)
                .map_or_else(|| data.field.clone(), |field| field.name.clone()),
        }
    }
}
