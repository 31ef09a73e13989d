use chunkstore_chunk_key_encoding::DimensionSeparator;
use chunkstore_metadata::v2::{
    decode_fill_value, DataTypeMetadataV2, FillValues, MetadataV2, ZarrDType, ZarrField,
    ZarrMetadata, ZarrPartialMetadata,
};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

use crate::cache_key::CacheKeyEncoder;
use crate::kvs_backed_chunk_driver::take_member;
use crate::schema::Schema;
use crate::DriverError;

/// The maximum size of a chunk chosen when `chunks` is not specified.
const DEFAULT_CHUNK_NUM_BYTES: u64 = 1 << 20;

/// The zarr-specific members of a specification.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZarrSpecData {
    pub(super) partial_metadata: ZarrPartialMetadata,
    pub(super) field: String,
}

/// The `codec` member of a schema.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct ZarrCodecSpec {
    #[allow(dead_code)]
    driver: monostate::MustBe!("zarr"),
    #[serde(default, deserialize_with = "deserialize_some")]
    compressor: Option<Option<MetadataV2>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    filters: Option<Option<Vec<MetadataV2>>>,
}

fn deserialize_some<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<T>, D::Error> {
    T::deserialize(deserializer).map(Some)
}

impl ZarrCodecSpec {
    fn from_json(codec: &Value) -> Result<Self, DriverError> {
        let codec: Self = serde_json::from_value(codec.clone()).map_err(|err| {
            DriverError::invalid_argument(format!("invalid zarr codec {codec}: {err}"))
        })?;
        if let Some(Some(filters)) = &codec.filters {
            if !filters.is_empty() {
                return Err(DriverError::invalid_argument("zarr codec \"filters\" must be null"));
            }
        }
        Ok(codec)
    }
}

impl ZarrSpecData {
    /// The constraints on the `.zarray` metadata.
    #[must_use]
    pub fn partial_metadata(&self) -> &ZarrPartialMetadata {
        &self.partial_metadata
    }

    /// The selected field, empty for an unstructured dtype.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The separator of the chunk keys of an array with `metadata`.
    ///
    /// Metadata written before `dimension_separator` existed does not specify one; the separator
    /// of the specification applies, and `.` if neither is given.
    #[must_use]
    pub fn dimension_separator(&self, metadata: &ZarrMetadata) -> DimensionSeparator {
        metadata
            .dimension_separator
            .or(self.partial_metadata.dimension_separator)
            .unwrap_or_default()
    }

    pub(super) fn from_json(members: &mut Map<String, Value>) -> Result<Self, DriverError> {
        let mut partial_metadata: ZarrPartialMetadata =
            take_member(members, "metadata")?.unwrap_or_default();
        partial_metadata.validate().map_err(|err| {
            DriverError::invalid_argument(format!("invalid \"metadata\": {err}"))
        })?;
        if let Some(key_encoding) = take_member::<DimensionSeparator>(members, "key_encoding")? {
            log::warn!(
                "\"key_encoding\" is deprecated, use \"metadata\": {{\"dimension_separator\": \"{key_encoding}\"}}"
            );
            match partial_metadata.dimension_separator {
                Some(separator) if separator != key_encoding => {
                    return Err(DriverError::invalid_argument(format!(
                        "\"key_encoding\" ({key_encoding}) does not match \"dimension_separator\" ({separator})"
                    )));
                }
                _ => partial_metadata.dimension_separator = Some(key_encoding),
            }
        }
        let field = take_member(members, "field")?.unwrap_or_default();
        Ok(Self {
            partial_metadata,
            field,
        })
    }

    pub(super) fn to_json(&self, members: &mut Map<String, Value>) {
        if self.partial_metadata != ZarrPartialMetadata::default() {
            members.insert(
                "metadata".to_string(),
                serde_json::to_value(&self.partial_metadata).unwrap_or_default(),
            );
        }
        if !self.field.is_empty() {
            members.insert("field".to_string(), Value::String(self.field.clone()));
        }
    }

    /// Check the schema against the metadata constraints.
    pub(super) fn validate_schema(&self, schema: &Schema) -> Result<(), DriverError> {
        let partial = &self.partial_metadata;
        if let Some(dtype) = &partial.dtype {
            let field = &dtype.fields[select_field(dtype, &self.field)?];
            if let Some(schema_dtype) = schema.dtype() {
                if schema_dtype != field.data_type() {
                    return Err(DriverError::invalid_argument(format!(
                        "schema dtype {schema_dtype} does not match dtype {} of field {:?}",
                        field.data_type(),
                        field.name
                    )));
                }
            }
            if let (Some(rank), Some(schema_rank)) = (partial.rank(), schema.rank()) {
                if rank + field.field_shape.len() != schema_rank {
                    return Err(DriverError::invalid_argument(format!(
                        "schema rank {schema_rank} does not match rank {} of field {:?}",
                        rank + field.field_shape.len(),
                        field.name
                    )));
                }
            }
        }
        if let Some(codec) = schema.codec() {
            let codec = ZarrCodecSpec::from_json(codec)?;
            if let (Some(expected), Some(compressor)) = (&codec.compressor, &partial.compressor) {
                if expected != compressor {
                    return Err(DriverError::invalid_argument(format!(
                        "schema codec compressor {} does not match \"compressor\" {}",
                        serde_json::to_string(expected).unwrap_or_default(),
                        serde_json::to_string(compressor).unwrap_or_default()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encode the members that determine which chunks are observed.
    pub(super) fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        let partial = &self.partial_metadata;
        encoder
            .encode(&self.field)
            .encode(&json!({
                "dimension_separator": partial.dimension_separator,
                "chunks": partial.chunks,
                "dtype": partial.dtype,
                "order": partial.order,
                "compressor": partial.compressor,
                "filters": partial.filters,
            }))
            .encode(&partial.compressor.is_some())
            .encode(&partial.filters.is_some());
    }

    /// Create new metadata from the metadata constraints, completed by the schema.
    pub(super) fn create_metadata(&self, schema: &Schema) -> Result<ZarrMetadata, DriverError> {
        let partial = &self.partial_metadata;
        let dtype = match (&partial.dtype, schema.dtype()) {
            (Some(dtype), _) => dtype.clone(),
            (None, Some(data_type)) => ZarrDType::from_data_type(data_type)
                .map_err(|err| DriverError::invalid_argument(err.to_string()))?,
            (None, None) => {
                return Err(DriverError::invalid_argument(
                    "\"dtype\" must be specified in \"metadata\" or \"schema\"",
                ))
            }
        };
        let field_index = select_field(&dtype, &self.field)?;
        let field = &dtype.fields[field_index];
        let field_rank = field.field_shape.len();

        let shape = match (&partial.shape, schema.shape()) {
            (Some(shape), _) => shape.clone(),
            (None, Some(shape)) if shape.len() >= field_rank => {
                shape[..shape.len() - field_rank].to_vec()
            }
            (None, Some(shape)) => {
                return Err(DriverError::invalid_argument(format!(
                    "schema shape {shape:?} has fewer dimensions than field {:?}",
                    field.name
                )))
            }
            (None, None) => {
                return Err(DriverError::invalid_argument(
                    "\"shape\" must be specified in \"metadata\" or \"schema\"",
                ))
            }
        };
        let chunks = partial
            .chunks
            .clone()
            .or_else(|| {
                schema
                    .chunk_shape()
                    .map(|chunk_shape| chunk_shape[..shape.len().min(chunk_shape.len())].to_vec())
            })
            .unwrap_or_else(|| default_chunks(&shape, dtype.bytes_per_outer_element));
        ZarrMetadata::validate_chunking(&shape, &chunks, &dtype)
            .map_err(|err| DriverError::invalid_argument(err.to_string()))?;

        let codec = schema.codec().map(ZarrCodecSpec::from_json).transpose()?;
        let compressor = partial
            .compressor
            .clone()
            .or_else(|| codec.and_then(|codec| codec.compressor))
            .flatten();
        if let Some(compressor) = &compressor {
            super::compressor(compressor)?;
        }

        let fill_value = match (&partial.fill_value, schema.fill_value()) {
            (Some(fill_value), _) => decode_fill_value(fill_value, &dtype)
                .map_err(|err| DriverError::invalid_argument(err.to_string()))?,
            (None, Some(fill_value)) => {
                let mut fill_values: FillValues = vec![None; dtype.fields.len()];
                fill_values[field_index] = field_fill_value(field, fill_value)?;
                fill_values
            }
            (None, None) => vec![None; dtype.fields.len()],
        };

        Ok(ZarrMetadata {
            shape,
            chunks,
            compressor,
            order: partial.order.unwrap_or_default(),
            dimension_separator: Some(partial.dimension_separator.unwrap_or_default()),
            fill_value,
            dtype,
            extra_members: Map::new(),
        })
    }
}

/// Halve the largest dimension of `shape` until a chunk fits in [`DEFAULT_CHUNK_NUM_BYTES`].
fn default_chunks(shape: &[u64], bytes_per_element: usize) -> Vec<u64> {
    let mut chunks: Vec<u64> = shape.iter().map(|&size| size.max(1)).collect();
    let bytes_per_element = u64::try_from(bytes_per_element).unwrap_or(u64::MAX).max(1);
    loop {
        let num_bytes = chunks
            .iter()
            .try_fold(bytes_per_element, |acc, &size| acc.checked_mul(size));
        if num_bytes.is_some_and(|num_bytes| num_bytes <= DEFAULT_CHUNK_NUM_BYTES) {
            return chunks;
        }
        match chunks.iter_mut().max() {
            Some(largest) if *largest > 1 => *largest = largest.div_ceil(2),
            _ => return chunks,
        }
    }
}

/// Resolve the index of `field` in `dtype`.
pub(super) fn select_field(dtype: &ZarrDType, field: &str) -> Result<usize, DriverError> {
    if field.is_empty() {
        if dtype.fields.len() != 1 {
            return Err(DriverError::invalid_argument(format!(
                "must specify a \"field\" of dtype {}",
                serde_json::to_string(dtype).unwrap_or_default()
            )));
        }
        return Ok(0);
    }
    if !dtype.has_fields {
        return Err(DriverError::invalid_argument(format!(
            "requested field {field:?} but dtype does not have named fields"
        )));
    }
    dtype.field_index(field).ok_or_else(|| {
        DriverError::invalid_argument(format!(
            "requested field {field:?} is not one of {:?}",
            dtype.fields.iter().map(|field| &field.name).collect::<Vec<_>>()
        ))
    })
}

/// Decode a fill value given for a single element of `field`, repeated over the subarray shape of the field.
fn field_fill_value(field: &ZarrField, fill_value: &Value) -> Result<Option<Vec<u8>>, DriverError> {
    let invalid = |err: &dyn std::fmt::Display| {
        DriverError::invalid_argument(format!(
            "invalid fill value {fill_value} for field {:?}: {err}",
            field.name
        ))
    };
    let element_dtype =
        ZarrDType::parse(&DataTypeMetadataV2::Simple(field.base.encoded_dtype.clone()))
            .map_err(|err| invalid(&err))?;
    let element = decode_fill_value(fill_value, &element_dtype)
        .map_err(|err| invalid(&err))?
        .into_iter()
        .next()
        .flatten();
    let repeat: u64 = field.outer_shape.iter().product();
    Ok(element.map(|element| element.repeat(usize::try_from(repeat).unwrap_or(usize::MAX))))
}

/// Check the fill value and codec constraints of a schema against the metadata.
pub(super) fn validate_schema_against_metadata(
    schema: &Schema,
    metadata: &ZarrMetadata,
    component_index: usize,
) -> Result<(), DriverError> {
    let field = &metadata.dtype.fields[component_index];
    if let Some(fill_value) = schema.fill_value() {
        let zeros = || vec![0u8; field.num_bytes];
        let expected = field_fill_value(field, fill_value)?.unwrap_or_else(zeros);
        let actual = metadata.fill_value[component_index]
            .clone()
            .unwrap_or_else(zeros);
        if expected != actual {
            return Err(DriverError::invalid_argument(format!(
                "schema fill_value {fill_value} does not match fill_value {}",
                metadata.fill_value_metadata()
            )));
        }
    }
    if let Some(codec) = schema.codec() {
        let codec = ZarrCodecSpec::from_json(codec)?;
        if let Some(compressor) = &codec.compressor {
            if *compressor != metadata.compressor {
                return Err(DriverError::invalid_argument(format!(
                    "schema codec compressor {} does not match \"compressor\" {}",
                    serde_json::to_string(compressor).unwrap_or_default(),
                    serde_json::to_string(&metadata.compressor).unwrap_or_default()
                )));
            }
        }
    }
    Ok(())
}
