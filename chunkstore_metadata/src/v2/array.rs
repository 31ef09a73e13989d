use chunkstore_chunk_key_encoding::DimensionSeparator;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    decode_fill_value, encode_fill_value, DataTypeMetadataError, DataTypeMetadataV2,
    FillValueError, FillValues, MetadataV2, ZarrDType,
};
use crate::{ArrayShape, ChunkShape};

/// Zarr V2 array metadata, as stored in a `.zarray` key.
///
/// An example `JSON` document for a Zarr V2 array:
/// ```json
/// {
///     "zarr_format": 2,
///     "shape": [10000, 10000],
///     "chunks": [1000, 1000],
///     "dtype": "<f8",
///     "compressor": {"id": "zlib", "level": 1},
///     "fill_value": "NaN",
///     "order": "C",
///     "filters": null,
///     "dimension_separator": "/"
/// }
/// ```
///
/// Members not listed here are preserved.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Display)]
#[display("{}", serde_json::to_string(self).unwrap_or_default())]
pub struct ArrayMetadataV2 {
    /// An integer defining the version of the storage specification to which the array adheres. Must be `2`.
    pub zarr_format: monostate::MustBe!(2u64),
    /// An array of integers providing the length of each dimension of the Zarr array.
    pub shape: ArrayShape,
    /// A list of integers defining the length of each dimension of a chunk of the array.
    pub chunks: ChunkShape,
    /// The data type of the Zarr array.
    pub dtype: DataTypeMetadataV2,
    /// A JSON object identifying the primary compression codec and providing configuration parameters, or null if no compressor is to be used.
    pub compressor: Option<MetadataV2>,
    /// The default value to use for uninitialized portions of the array, or null.
    pub fill_value: serde_json::Value,
    /// Either “C” or “F”, defining the layout of bytes within each chunk of the array.
    pub order: ArrayMetadataV2Order,
    /// A list of JSON objects providing codec configurations, or null if no filters are to be applied.
    pub filters: Option<Vec<MetadataV2>>,
    /// If present, either the string "." or "/" defining the separator placed between the dimensions of a chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_separator: Option<DimensionSeparator>,
    /// Additional members.
    #[serde(flatten)]
    pub extra_members: serde_json::Map<String, serde_json::Value>,
}

/// Zarr V2 order metadata. Indicates the layout of bytes within a chunk.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum ArrayMetadataV2Order {
    /// Row-major order. The last dimension varies fastest.
    #[default]
    C,
    /// Column-major order. The first dimension varies fastest.
    F,
}

/// Invalid Zarr V2 array metadata.
#[derive(Clone, Debug, Error)]
pub enum ArrayMetadataV2Error {
    /// `shape` and `chunks` differ in length.
    #[error("\"shape\" has rank {shape} but \"chunks\" has rank {chunks}")]
    RankMismatch {
        /// Rank of the shape.
        shape: usize,
        /// Rank of the chunks.
        chunks: usize,
    },
    /// A zero chunk dimension.
    #[error("\"chunks\" must be positive, got {0:?}")]
    InvalidChunks(ChunkShape),
    /// A chunk whose size in bytes overflows.
    #[error("chunk of shape {0:?} is too large")]
    ChunkTooLarge(ChunkShape),
    /// Non-empty filters.
    #[error("\"filters\" must be null, got {0}")]
    FiltersUnsupported(serde_json::Value),
    /// An invalid data type.
    #[error(transparent)]
    DataType(#[from] DataTypeMetadataError),
    /// An invalid fill value.
    #[error(transparent)]
    FillValue(#[from] FillValueError),
}

/// Decoded and validated Zarr V2 array metadata.
///
/// Converts to and from [`ArrayMetadataV2`] through serde.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(try_from = "ArrayMetadataV2", into = "ArrayMetadataV2")]
pub struct ZarrMetadata {
    /// The array shape.
    pub shape: ArrayShape,
    /// The chunk shape.
    pub chunks: ChunkShape,
    /// The data type.
    pub dtype: ZarrDType,
    /// The compressor, if any.
    pub compressor: Option<MetadataV2>,
    /// The storage order of records within a chunk.
    pub order: ArrayMetadataV2Order,
    /// The dimension separator, if specified.
    pub dimension_separator: Option<DimensionSeparator>,
    /// The fill value of each field.
    pub fill_value: FillValues,
    /// Additional members.
    pub extra_members: serde_json::Map<String, serde_json::Value>,
}

impl ZarrMetadata {
    /// Validate `shape`, `chunks` and `dtype` as a consistent combination.
    ///
    /// # Errors
    /// Returns an [`ArrayMetadataV2Error`] if the rank differs, a chunk dimension is zero, or a chunk is too large to address.
    pub fn validate_chunking(
        shape: &[u64],
        chunks: &[u64],
        dtype: &ZarrDType,
    ) -> Result<(), ArrayMetadataV2Error> {
        if shape.len() != chunks.len() {
            return Err(ArrayMetadataV2Error::RankMismatch {
                shape: shape.len(),
                chunks: chunks.len(),
            });
        }
        if chunks.contains(&0) {
            return Err(ArrayMetadataV2Error::InvalidChunks(chunks.to_vec()));
        }
        chunks
            .iter()
            .try_fold(1u64, |acc, &size| acc.checked_mul(size))
            .and_then(|elements| usize::try_from(elements).ok())
            .and_then(|elements| elements.checked_mul(dtype.bytes_per_outer_element))
            .ok_or_else(|| ArrayMetadataV2Error::ChunkTooLarge(chunks.to_vec()))?;
        Ok(())
    }

    /// The number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The number of records in one chunk.
    #[must_use]
    pub fn chunk_num_elements(&self) -> u64 {
        self.chunks.iter().product()
    }

    /// The size of one uncompressed chunk in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn chunk_num_bytes(&self) -> usize {
        // Checked to fit by `validate_chunking`.
        self.chunk_num_elements() as usize * self.dtype.bytes_per_outer_element
    }

    /// The dimension separator used for chunk keys.
    #[must_use]
    pub fn effective_dimension_separator(&self) -> DimensionSeparator {
        self.dimension_separator.unwrap_or_default()
    }

    /// The fill value metadata.
    #[must_use]
    pub fn fill_value_metadata(&self) -> serde_json::Value {
        encode_fill_value(&self.dtype, &self.fill_value)
    }

    /// Serialize the metadata to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(ArrayMetadataV2::from(self.clone())).unwrap_or_default()
    }
}

impl TryFrom<ArrayMetadataV2> for ZarrMetadata {
    type Error = ArrayMetadataV2Error;

    fn try_from(metadata: ArrayMetadataV2) -> Result<Self, Self::Error> {
        let dtype = ZarrDType::parse(&metadata.dtype)?;
        Self::validate_chunking(&metadata.shape, &metadata.chunks, &dtype)?;
        let filters = metadata.filters.filter(|filters| !filters.is_empty());
        if let Some(filters) = filters {
            return Err(ArrayMetadataV2Error::FiltersUnsupported(
                serde_json::to_value(filters).unwrap_or_default(),
            ));
        }
        let fill_value = decode_fill_value(&metadata.fill_value, &dtype)?;
        Ok(Self {
            shape: metadata.shape,
            chunks: metadata.chunks,
            dtype,
            compressor: metadata.compressor,
            order: metadata.order,
            dimension_separator: metadata.dimension_separator,
            fill_value,
            extra_members: metadata.extra_members,
        })
    }
}

impl From<ZarrMetadata> for ArrayMetadataV2 {
    fn from(metadata: ZarrMetadata) -> Self {
        Self {
            zarr_format: monostate::MustBe!(2u64),
            fill_value: metadata.fill_value_metadata(),
            shape: metadata.shape,
            chunks: metadata.chunks,
            dtype: metadata.dtype.to_metadata(),
            compressor: metadata.compressor,
            order: metadata.order,
            filters: None,
            dimension_separator: metadata.dimension_separator,
            extra_members: metadata.extra_members,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn array_metadata_round_trip() {
        let json = json!({
            "zarr_format": 2,
            "shape": [4, 4],
            "chunks": [2, 2],
            "dtype": "<i4",
            "compressor": {"id": "zlib", "level": 1},
            "fill_value": 3,
            "order": "F",
            "filters": null,
            "dimension_separator": "/",
            "custom": {"a": 1}
        });
        let metadata: ZarrMetadata = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(metadata.rank(), 2);
        assert_eq!(metadata.chunk_num_bytes(), 16);
        assert_eq!(metadata.order, ArrayMetadataV2Order::F);
        assert_eq!(
            metadata.effective_dimension_separator(),
            DimensionSeparator::Slash
        );
        assert_eq!(metadata.extra_members["custom"], json!({"a": 1}));
        assert_eq!(metadata.to_json(), json);

        let encoded = serde_json::to_vec(&metadata).unwrap();
        let decoded: ZarrMetadata = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn array_metadata_defaults() {
        let metadata: ZarrMetadata = serde_json::from_value(json!({
            "zarr_format": 2,
            "shape": [10],
            "chunks": [3],
            "dtype": "|u1",
            "compressor": null,
            "fill_value": null,
            "order": "C",
            "filters": []
        }))
        .unwrap();
        assert_eq!(metadata.dimension_separator, None);
        assert_eq!(
            metadata.effective_dimension_separator(),
            DimensionSeparator::Dot
        );
        assert_eq!(metadata.fill_value, vec![None]);
        assert_eq!(metadata.to_json()["filters"], serde_json::Value::Null);
    }

    #[test]
    fn array_metadata_invalid() {
        let base = json!({
            "zarr_format": 2,
            "shape": [10, 10],
            "chunks": [3, 3],
            "dtype": "<i2",
            "compressor": null,
            "fill_value": 0,
            "order": "C",
            "filters": null
        });
        let with = |key: &str, value: serde_json::Value| {
            let mut json = base.clone();
            json[key] = value;
            serde_json::from_value::<ZarrMetadata>(json)
        };
        assert!(with("zarr_format", json!(3)).is_err());
        assert!(with("chunks", json!([3])).is_err());
        assert!(with("chunks", json!([3, 0])).is_err());
        assert!(with("dtype", json!("<i3")).is_err());
        assert!(with("fill_value", json!("abc")).is_err());
        assert!(with("order", json!("X")).is_err());
        assert!(with("filters", json!([{"id": "delta"}])).is_err());
        assert!(with("dimension_separator", json!("-")).is_err());
        assert!(with("shape", json!([10, 10])).is_ok());
    }
}
