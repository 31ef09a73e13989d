use chunkstore_chunk_key_encoding::DimensionSeparator;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{
    decode_fill_value, ArrayMetadataV2Error, ArrayMetadataV2Order, MetadataV2, ZarrDType,
    ZarrMetadata,
};
use crate::{ArrayShape, ChunkShape};

/// Constraints on Zarr V2 array metadata.
///
/// Every member is optional. A member that is present must match the corresponding member of the stored metadata.
/// `compressor`, `filters` and `fill_value` distinguish an absent member from an explicit `null`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ZarrPartialMetadata {
    /// Must be `2` if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zarr_format: Option<monostate::MustBe!(2u64)>,
    /// The array shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ArrayShape>,
    /// The chunk shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<ChunkShape>,
    /// The data type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<ZarrDType>,
    /// The compressor.
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub compressor: Option<Option<MetadataV2>>,
    /// The storage order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<ArrayMetadataV2Order>,
    /// The filters. Only `null` (or an empty list) is supported.
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub filters: Option<Option<Vec<MetadataV2>>>,
    /// The fill value metadata, decoded against the data type on use.
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub fill_value: Option<Value>,
    /// The dimension separator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_separator: Option<DimensionSeparator>,
}

fn deserialize_some<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<T>, D::Error> {
    T::deserialize(deserializer).map(Some)
}

/// A mismatch between metadata and a constraint.
#[derive(Clone, Debug, Error)]
#[error("expected {member:?} of {expected} but received: {actual}")]
pub struct MetadataMismatchError {
    /// The name of the mismatched member.
    pub member: &'static str,
    /// The constrained value.
    pub expected: Value,
    /// The value in the metadata.
    pub actual: Value,
}

impl ZarrPartialMetadata {
    /// Create constraints matching every member of `metadata`.
    #[must_use]
    pub fn from_metadata(metadata: &ZarrMetadata) -> Self {
        Self {
            zarr_format: Some(monostate::MustBe!(2u64)),
            shape: Some(metadata.shape.clone()),
            chunks: Some(metadata.chunks.clone()),
            dtype: Some(metadata.dtype.clone()),
            compressor: Some(metadata.compressor.clone()),
            order: Some(metadata.order),
            filters: Some(None),
            fill_value: Some(metadata.fill_value_metadata()),
            dimension_separator: Some(metadata.effective_dimension_separator()),
        }
    }

    /// Validate the constraints for internal consistency.
    ///
    /// # Errors
    /// Returns an [`ArrayMetadataV2Error`] if `shape` and `chunks` are inconsistent, `filters` are not null, or the fill value is invalid for the data type.
    pub fn validate(&self) -> Result<(), ArrayMetadataV2Error> {
        if let Some(chunks) = &self.chunks {
            if chunks.contains(&0) {
                return Err(ArrayMetadataV2Error::InvalidChunks(chunks.clone()));
            }
        }
        if let (Some(shape), Some(chunks)) = (&self.shape, &self.chunks) {
            if shape.len() != chunks.len() {
                return Err(ArrayMetadataV2Error::RankMismatch {
                    shape: shape.len(),
                    chunks: chunks.len(),
                });
            }
        }
        if let Some(Some(filters)) = &self.filters {
            if !filters.is_empty() {
                return Err(ArrayMetadataV2Error::FiltersUnsupported(
                    serde_json::to_value(filters).unwrap_or_default(),
                ));
            }
        }
        if let (Some(dtype), Some(fill_value)) = (&self.dtype, &self.fill_value) {
            decode_fill_value(fill_value, dtype)?;
        }
        Ok(())
    }

    /// The rank implied by `shape` or `chunks`, if either is present.
    #[must_use]
    pub fn rank(&self) -> Option<usize> {
        self.shape
            .as_ref()
            .or(self.chunks.as_ref())
            .map(Vec::len)
    }

    /// Check that `metadata` satisfies every present constraint.
    ///
    /// # Errors
    /// Returns a [`MetadataMismatchError`] naming the first member that does not match.
    pub fn validate_metadata(&self, metadata: &ZarrMetadata) -> Result<(), MetadataMismatchError> {
        fn check<T: Serialize + PartialEq>(
            member: &'static str,
            expected: Option<&T>,
            actual: &T,
        ) -> Result<(), MetadataMismatchError> {
            match expected {
                Some(expected) if expected != actual => Err(MetadataMismatchError {
                    member,
                    expected: serde_json::to_value(expected).unwrap_or_default(),
                    actual: serde_json::to_value(actual).unwrap_or_default(),
                }),
                _ => Ok(()),
            }
        }
        check("shape", self.shape.as_ref(), &metadata.shape)?;
        check("chunks", self.chunks.as_ref(), &metadata.chunks)?;
        check("dtype", self.dtype.as_ref(), &metadata.dtype)?;
        check("compressor", self.compressor.as_ref(), &metadata.compressor)?;
        check("order", self.order.as_ref(), &metadata.order)?;
        // Metadata written without a separator is read with the one given here.
        if let Some(dimension_separator) = &metadata.dimension_separator {
            check(
                "dimension_separator",
                self.dimension_separator.as_ref(),
                dimension_separator,
            )?;
        }
        if let Some(fill_value) = &self.fill_value {
            let matches = decode_fill_value(fill_value, &metadata.dtype)
                .is_ok_and(|expected| expected == metadata.fill_value);
            if !matches {
                return Err(MetadataMismatchError {
                    member: "fill_value",
                    expected: fill_value.clone(),
                    actual: metadata.fill_value_metadata(),
                });
            }
        }
        Ok(())
    }
}
