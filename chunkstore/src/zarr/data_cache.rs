use std::borrow::Cow;

use chunkstore_chunk_grid::{
    ArrayIndices, ArraySubset, BroadcastArray, ChunkGridBounds, ChunkGridComponent,
    ChunkGridSpecification, SharedArray,
};
use chunkstore_chunk_key_encoding::{ChunkKeyEncoding, DimensionSeparator};
use chunkstore_data_type::convert_endianness;
use chunkstore_metadata::v2::{ArrayMetadataV2Order, ZarrMetadata};
use serde_json::{json, Value};

use crate::codec::Compressor;
use crate::driver::ChunkLayout;
use crate::kvs_backed_chunk_driver::DataCacheFormat;
use crate::DriverError;

/// The zarr-specific part of a data cache: chunk keys and the chunk codec.
#[derive(Debug)]
pub struct ZarrDataCache {
    key_prefix: String,
    key_encoding: ChunkKeyEncoding,
    grid: ChunkGridSpecification,
    compressor: Option<Compressor>,
}

/// The metadata members that must not change while a data cache is in use.
///
/// `dimension_separator` applies if the metadata does not specify a separator.
pub(super) fn compatibility_json(
    metadata: &ZarrMetadata,
    dimension_separator: DimensionSeparator,
) -> Value {
    let mut json = metadata.to_json();
    if let Value::Object(members) = &mut json {
        members.remove("shape");
        members.insert(
            "dimension_separator".to_string(),
            Value::String(
                metadata
                    .dimension_separator
                    .unwrap_or(dimension_separator)
                    .to_string(),
            ),
        );
    }
    json
}

/// The stored position of each record of a chunk, in C order of the chunked dimensions.
///
/// [`None`] if records are stored in C order.
fn stored_record_positions(metadata: &ZarrMetadata) -> Option<Vec<usize>> {
    match metadata.order {
        ArrayMetadataV2Order::C => None,
        ArrayMetadataV2Order::F => Some(
            ArraySubset::new_with_shape(metadata.chunks.clone())
                .indices()
                .map(|indices| {
                    let position = std::iter::zip(&indices, &metadata.chunks)
                        .rev()
                        .fold(0u64, |acc, (&index, &size)| acc * size + index);
                    usize::try_from(position).unwrap_or(usize::MAX)
                })
                .collect(),
        ),
    }
}

impl ZarrDataCache {
    /// Create the data cache of the array with `metadata` stored under `key_prefix`.
    ///
    /// Chunk keys use the separator of `metadata`, or `dimension_separator` if it specifies none.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the compressor is unsupported or invalid.
    pub fn new(
        key_prefix: &str,
        metadata: &ZarrMetadata,
        dimension_separator: DimensionSeparator,
    ) -> Result<Self, DriverError> {
        let internal = |err: &dyn std::fmt::Display| DriverError::internal(err.to_string());
        let rank = metadata.rank();
        let components = std::iter::zip(&metadata.dtype.fields, &metadata.fill_value)
            .map(|(field, fill_value)| {
                let inner = match fill_value {
                    Some(bytes) => SharedArray::new(
                        field.data_type(),
                        field.field_shape.clone(),
                        bytes.clone(),
                    ),
                    None => SharedArray::new_zeroed(field.data_type(), field.field_shape.clone()),
                }
                .map_err(|err| internal(&err))?;
                let mut cell_shape = metadata.chunks.clone();
                cell_shape.extend_from_slice(&field.field_shape);
                let fill_value =
                    BroadcastArray::new(inner, cell_shape).map_err(|err| internal(&err))?;
                Ok(ChunkGridComponent::new(fill_value, (0..rank).collect()))
            })
            .collect::<Result<Vec<_>, DriverError>>()?;
        let grid = ChunkGridSpecification::new(components, metadata.chunks.clone())
            .map_err(|err| internal(&err))?;
        let compressor = metadata
            .compressor
            .as_ref()
            .map(super::compressor)
            .transpose()?;
        Ok(Self {
            key_prefix: key_prefix.to_string(),
            key_encoding: ChunkKeyEncoding::new(
                metadata.dimension_separator.unwrap_or(dimension_separator),
            ),
            grid,
            compressor,
        })
    }
}

impl DataCacheFormat for ZarrDataCache {
    type Metadata = ZarrMetadata;

    fn validate_metadata_compatibility(
        &self,
        existing: &ZarrMetadata,
        new: &ZarrMetadata,
    ) -> Result<(), DriverError> {
        let separator = self.key_encoding.separator();
        let (existing, new) = (
            compatibility_json(existing, separator),
            compatibility_json(new, separator),
        );
        if existing == new {
            Ok(())
        } else {
            Err(DriverError::failed_precondition(format!(
                "updated zarr metadata {new} is incompatible with existing metadata {existing}"
            )))
        }
    }

    fn resized_metadata(
        &self,
        existing: &ZarrMetadata,
        new_inclusive_min: &[Option<u64>],
        new_exclusive_max: &[Option<u64>],
    ) -> ZarrMetadata {
        assert!(
            new_inclusive_min.iter().all(|min| matches!(min, None | Some(0))),
            "zarr arrays have a zero origin, got {new_inclusive_min:?}"
        );
        let mut metadata = existing.clone();
        for (size, new_size) in std::iter::zip(&mut metadata.shape, new_exclusive_max) {
            if let Some(new_size) = new_size {
                *size = *new_size;
            }
        }
        metadata
    }

    fn chunk_grid_bounds(&self, metadata: &ZarrMetadata) -> ChunkGridBounds {
        ChunkGridBounds::resizable(metadata.shape.clone())
    }

    fn chunk_grid_specification(&self) -> &ChunkGridSpecification {
        &self.grid
    }

    fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn chunk_storage_key(&self, chunk_indices: &[u64]) -> String {
        self.key_encoding
            .encode_with_prefix(&self.key_prefix, chunk_indices)
    }

    fn parse_chunk_storage_key(&self, key: &str) -> Option<ArrayIndices> {
        let key = key.strip_prefix(&self.key_prefix)?;
        self.key_encoding.decode(key, self.grid.rank())
    }

    fn decode_chunk(
        &self,
        metadata: &ZarrMetadata,
        chunk_indices: &[u64],
        bytes: &[u8],
    ) -> Result<Vec<SharedArray>, DriverError> {
        let num_bytes = metadata.chunk_num_bytes();
        let decoded = match &self.compressor {
            Some(compressor) => Cow::Owned(compressor.decode(bytes, num_bytes).map_err(|err| {
                DriverError::data_loss(format!(
                    "error decompressing chunk {chunk_indices:?}: {err}"
                ))
            })?),
            None => Cow::Borrowed(bytes),
        };
        if decoded.len() != num_bytes {
            return Err(DriverError::data_loss(format!(
                "chunk {chunk_indices:?} has {} bytes, expected {num_bytes}",
                decoded.len()
            )));
        }

        let record_size = metadata.dtype.bytes_per_outer_element;
        let positions = stored_record_positions(metadata);
        let fields = &metadata.dtype.fields;
        std::iter::zip(fields, self.grid.components())
            .map(|(field, component)| {
                let mut field_bytes = if positions.is_none() && fields.len() == 1 {
                    decoded.to_vec()
                } else {
                    let num_records = num_bytes / record_size.max(1);
                    let mut field_bytes = vec![0u8; num_records * field.num_bytes];
                    for (record, out) in field_bytes
                        .chunks_exact_mut(field.num_bytes.max(1))
                        .enumerate()
                    {
                        let stored = positions
                            .as_ref()
                            .map_or(record, |positions| positions[record]);
                        let offset = stored * record_size + field.byte_offset;
                        out.copy_from_slice(&decoded[offset..offset + field.num_bytes]);
                    }
                    field_bytes
                };
                convert_endianness(&mut field_bytes, field.data_type(), field.base.endianness);
                SharedArray::new(
                    component.data_type(),
                    component.cell_shape().to_vec(),
                    field_bytes,
                )
                .map_err(|err| DriverError::data_loss(err.to_string()))
            })
            .collect()
    }

    fn encode_chunk(
        &self,
        metadata: &ZarrMetadata,
        chunk_indices: &[u64],
        components: &[SharedArray],
    ) -> Result<Vec<u8>, DriverError> {
        let fields = &metadata.dtype.fields;
        if components.len() != fields.len() {
            return Err(DriverError::internal(format!(
                "expected {} components for chunk {chunk_indices:?}, got {}",
                fields.len(),
                components.len()
            )));
        }
        let num_bytes = metadata.chunk_num_bytes();
        let record_size = metadata.dtype.bytes_per_outer_element;
        let num_records = num_bytes / record_size.max(1);
        let positions = stored_record_positions(metadata);

        let mut encoded = vec![0u8; num_bytes];
        for (field, component) in std::iter::zip(fields, components) {
            if component.as_bytes().len() != num_records * field.num_bytes {
                return Err(DriverError::internal(format!(
                    "component of shape {:?} does not match field {:?} of chunk {chunk_indices:?}",
                    component.shape(),
                    field.name
                )));
            }
            let mut field_bytes = component.as_bytes().to_vec();
            convert_endianness(&mut field_bytes, field.data_type(), field.base.endianness);
            if positions.is_none() && fields.len() == 1 {
                encoded = field_bytes;
                continue;
            }
            for (record, element) in field_bytes
                .chunks_exact(field.num_bytes.max(1))
                .enumerate()
            {
                let stored = positions
                    .as_ref()
                    .map_or(record, |positions| positions[record]);
                let offset = stored * record_size + field.byte_offset;
                encoded[offset..offset + field.num_bytes].copy_from_slice(element);
            }
        }

        match &self.compressor {
            Some(compressor) => compressor.encode(&encoded).map_err(|err| {
                DriverError::internal(format!(
                    "error compressing chunk {chunk_indices:?}: {err}"
                ))
            }),
            None => Ok(encoded),
        }
    }

    fn chunk_layout(&self, metadata: &ZarrMetadata, component_index: usize) -> ChunkLayout {
        let rank = metadata.rank();
        let cell_shape = self.grid.components()[component_index].cell_shape().to_vec();
        let inner_order = match metadata.order {
            ArrayMetadataV2Order::C => (0..cell_shape.len()).collect(),
            ArrayMetadataV2Order::F => (0..rank).rev().chain(rank..cell_shape.len()).collect(),
        };
        ChunkLayout {
            grid_origin: vec![0; cell_shape.len()],
            write_chunk_shape: cell_shape.clone(),
            read_chunk_shape: cell_shape,
            inner_order,
        }
    }

    fn codec(&self, metadata: &ZarrMetadata) -> Value {
        json!({
            "driver": "zarr",
            "compressor": metadata.compressor,
            "filters": null,
        })
    }
}
