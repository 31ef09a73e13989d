use std::str::FromStr;

use derive_more::Display;
use thiserror::Error;

/// An element data type.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum DataType {
    /// `bool` stored as a single byte (0 or 1).
    #[display("bool")]
    Bool,
    /// `int8`
    #[display("int8")]
    Int8,
    /// `int16`
    #[display("int16")]
    Int16,
    /// `int32`
    #[display("int32")]
    Int32,
    /// `int64`
    #[display("int64")]
    Int64,
    /// `uint8`
    #[display("uint8")]
    UInt8,
    /// `uint16`
    #[display("uint16")]
    UInt16,
    /// `uint32`
    #[display("uint32")]
    UInt32,
    /// `uint64`
    #[display("uint64")]
    UInt64,
    /// IEEE 754 half-precision floating point.
    #[display("float16")]
    Float16,
    /// IEEE 754 single-precision floating point.
    #[display("float32")]
    Float32,
    /// IEEE 754 double-precision floating point.
    #[display("float64")]
    Float64,
    /// A complex number of two `float32` components.
    #[display("complex64")]
    Complex64,
    /// A complex number of two `float64` components.
    #[display("complex128")]
    Complex128,
    /// A single character byte.
    #[display("char")]
    Char,
    /// A single uninterpreted byte.
    #[display("byte")]
    Byte,
}

/// An unknown data type name.
#[derive(Clone, Debug, Error)]
#[error("unknown data type {0:?}")]
pub struct DataTypeNameError(String);

impl DataType {
    /// All data types.
    pub const ALL: [Self; 16] = [
        Self::Bool,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float16,
        Self::Float32,
        Self::Float64,
        Self::Complex64,
        Self::Complex128,
        Self::Char,
        Self::Byte,
    ];

    /// The size of one element in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 | Self::Char | Self::Byte => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Complex64 => 8,
            Self::Complex128 => 16,
        }
    }

    /// The size in bytes of the unit that is byte swapped when converting between byte orders.
    ///
    /// Complex numbers swap each component independently.
    #[must_use]
    pub const fn swap_size(&self) -> usize {
        match self {
            Self::Complex64 => 4,
            Self::Complex128 => 8,
            _ => self.size(),
        }
    }

    /// The name of the data type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
            Self::Char => "char",
            Self::Byte => "byte",
        }
    }
}

impl FromStr for DataType {
    type Err = DataTypeNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|data_type| data_type.name() == name)
            .ok_or_else(|| DataTypeNameError(name.to_string()))
    }
}

impl serde::Serialize for DataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for DataType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
