//! Schema constraints.
//!
//! A [`Schema`] constrains the observable properties of an opened array independently of its format:
//! ```json
//! {
//!     "rank": 2,
//!     "dtype": "int32",
//!     "shape": [100, 200],
//!     "chunk_shape": [10, 20],
//!     "fill_value": 0,
//!     "codec": {"driver": "zarr", "compressor": null}
//! }
//! ```
//! Every member is optional.
//! The shape and chunk shape span every dimension of the array, including the trailing dimensions of a field.

use chunkstore_data_type::DataType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DriverError;

/// Schema constraints.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dtype: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_shape: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fill_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    codec: Option<Value>,
}

fn set_constraint<T: PartialEq + std::fmt::Debug + Clone>(
    member: &str,
    current: &mut Option<T>,
    value: T,
) -> Result<(), DriverError> {
    match current {
        Some(current) if *current != value => Err(DriverError::invalid_argument(format!(
            "specified {member} ({value:?}) does not match existing value ({current:?})"
        ))),
        Some(_) => Ok(()),
        None => {
            *current = Some(value);
            Ok(())
        }
    }
}

impl Schema {
    /// Parse a schema from JSON.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if the JSON is invalid or its constraints are inconsistent.
    pub fn from_json(json: &Value) -> Result<Self, DriverError> {
        let schema: Self = serde_json::from_value(json.clone())
            .map_err(|err| DriverError::invalid_argument(format!("invalid schema {json}: {err}")))?;
        let mut validated = Self::default();
        validated.merge(&schema)?;
        Ok(validated)
    }

    /// The JSON form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Returns true if the schema has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The rank constraint, implied by the shape or chunk shape if not set explicitly.
    #[must_use]
    pub fn rank(&self) -> Option<usize> {
        self.rank
            .or_else(|| self.shape.as_ref().map(Vec::len))
            .or_else(|| self.chunk_shape.as_ref().map(Vec::len))
    }

    /// The data type constraint.
    #[must_use]
    pub fn dtype(&self) -> Option<DataType> {
        self.dtype
    }

    /// The shape constraint.
    #[must_use]
    pub fn shape(&self) -> Option<&[u64]> {
        self.shape.as_deref()
    }

    /// The chunk shape constraint.
    #[must_use]
    pub fn chunk_shape(&self) -> Option<&[u64]> {
        self.chunk_shape.as_deref()
    }

    /// The fill value constraint, interpreted by the format.
    #[must_use]
    pub fn fill_value(&self) -> Option<&Value> {
        self.fill_value.as_ref()
    }

    /// The codec constraint, interpreted by the format.
    #[must_use]
    pub fn codec(&self) -> Option<&Value> {
        self.codec.as_ref()
    }

    fn check_rank(&self, member: &str, rank: usize) -> Result<(), DriverError> {
        match self.rank() {
            Some(expected) if expected != rank => Err(DriverError::invalid_argument(format!(
                "rank of {member} ({rank}) does not match rank constraint ({expected})"
            ))),
            _ => Ok(()),
        }
    }

    /// Constrain the rank.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a conflicting constraint.
    pub fn set_rank(&mut self, rank: usize) -> Result<(), DriverError> {
        self.check_rank("rank", rank)?;
        set_constraint("rank", &mut self.rank, rank)
    }

    /// Constrain the data type.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a conflicting constraint.
    pub fn set_dtype(&mut self, dtype: DataType) -> Result<(), DriverError> {
        set_constraint("dtype", &mut self.dtype, dtype)
    }

    /// Constrain the shape.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a conflicting constraint.
    pub fn set_shape(&mut self, shape: Vec<u64>) -> Result<(), DriverError> {
        self.check_rank("shape", shape.len())?;
        set_constraint("shape", &mut self.shape, shape)
    }

    /// Constrain the chunk shape.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a conflicting constraint or a zero chunk dimension.
    pub fn set_chunk_shape(&mut self, chunk_shape: Vec<u64>) -> Result<(), DriverError> {
        if chunk_shape.contains(&0) {
            return Err(DriverError::invalid_argument(format!(
                "chunk_shape must be positive, got {chunk_shape:?}"
            )));
        }
        self.check_rank("chunk_shape", chunk_shape.len())?;
        set_constraint("chunk_shape", &mut self.chunk_shape, chunk_shape)
    }

    /// Constrain the fill value.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a conflicting constraint.
    pub fn set_fill_value(&mut self, fill_value: Value) -> Result<(), DriverError> {
        set_constraint("fill_value", &mut self.fill_value, fill_value)
    }

    /// Constrain the codec.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) on a conflicting constraint.
    pub fn set_codec(&mut self, codec: Value) -> Result<(), DriverError> {
        set_constraint("codec", &mut self.codec, codec)
    }

    /// Merge the constraints of `other`. Merging equal constraints has no effect.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if a constraint of `other` conflicts.
    pub fn merge(&mut self, other: &Self) -> Result<(), DriverError> {
        if let Some(rank) = other.rank {
            self.set_rank(rank)?;
        }
        if let Some(dtype) = other.dtype {
            self.set_dtype(dtype)?;
        }
        if let Some(shape) = &other.shape {
            self.set_shape(shape.clone())?;
        }
        if let Some(chunk_shape) = &other.chunk_shape {
            self.set_chunk_shape(chunk_shape.clone())?;
        }
        if let Some(fill_value) = &other.fill_value {
            self.set_fill_value(fill_value.clone())?;
        }
        if let Some(codec) = &other.codec {
            self.set_codec(codec.clone())?;
        }
        Ok(())
    }
}
