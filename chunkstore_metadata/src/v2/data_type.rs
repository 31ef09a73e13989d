use chunkstore_data_type::DataType;
use derive_more::From;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Endianness;

/// Zarr V2 structured data type field metadata.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(
    from = "DataTypeMetadataV2StructuredTuple",
    into = "DataTypeMetadataV2StructuredTuple"
)]
pub struct DataTypeMetadataV2Structured {
    /// Field name.
    pub fieldname: String,
    /// Data type.
    pub datatype: String,
    /// Subarray shape.
    pub shape: Option<Vec<u64>>,
}

#[derive(Serialize, Deserialize)]
struct DataTypeMetadataV2StructuredTuple(
    String,
    String,
    #[serde(default, skip_serializing_if = "Option::is_none")] Option<Vec<u64>>,
);

impl From<DataTypeMetadataV2StructuredTuple> for DataTypeMetadataV2Structured {
    fn from(value: DataTypeMetadataV2StructuredTuple) -> Self {
        let DataTypeMetadataV2StructuredTuple(fieldname, datatype, shape) = value;
        Self {
            fieldname,
            datatype,
            shape,
        }
    }
}

impl From<DataTypeMetadataV2Structured> for DataTypeMetadataV2StructuredTuple {
    fn from(value: DataTypeMetadataV2Structured) -> Self {
        Self(value.fieldname, value.datatype, value.shape)
    }
}

/// Zarr V2 data type metadata.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, From)]
#[serde(untagged)]
pub enum DataTypeMetadataV2 {
    /// A simple data type.
    #[from(String, &str)]
    Simple(String),
    /// A structured data type.
    Structured(Vec<DataTypeMetadataV2Structured>),
}

/// An invalid Zarr V2 data type.
#[derive(Clone, Debug, Error)]
pub enum DataTypeMetadataError {
    /// An unsupported or malformed type string.
    #[error("unsupported zarr dtype: {0:?}")]
    Unsupported(String),
    /// A multi-byte type without a byte order.
    #[error("dtype {0:?} requires a byte order of \"<\" or \">\"")]
    MissingByteOrder(String),
    /// A structured data type without fields.
    #[error("structured dtype must have at least one field")]
    NoFields,
    /// An empty field name.
    #[error("field names must be non-empty")]
    EmptyFieldName,
    /// A repeated field name.
    #[error("field name {0:?} occurs more than once")]
    DuplicateFieldName(String),
    /// A data type whose size overflows.
    #[error("dtype is too large")]
    TooLarge,
}

/// A decoded scalar type string, such as `<i4` or `|S10`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BaseDataType {
    /// The type string as it appears in metadata.
    pub encoded_dtype: String,
    /// The in-memory element type.
    pub data_type: DataType,
    /// The stored byte order.
    pub endianness: Endianness,
    /// Extra trailing dimensions of flexible types (`S` and `V`).
    pub flexible_shape: Vec<u64>,
}

impl BaseDataType {
    /// Parse a type string.
    ///
    /// # Errors
    /// Returns a [`DataTypeMetadataError`] if `dtype` is not a supported type string.
    pub fn parse(dtype: &str) -> Result<Self, DataTypeMetadataError> {
        let unsupported = || DataTypeMetadataError::Unsupported(dtype.to_string());
        let mut chars = dtype.chars();
        let (Some(order), Some(kind)) = (chars.next(), chars.next()) else {
            return Err(unsupported());
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(unsupported());
        }
        let size: u64 = digits.parse().map_err(|_| unsupported())?;

        let (data_type, flexible_shape) = match (kind, size) {
            ('b', 1) => (DataType::Bool, vec![]),
            ('i', 1) => (DataType::Int8, vec![]),
            ('i', 2) => (DataType::Int16, vec![]),
            ('i', 4) => (DataType::Int32, vec![]),
            ('i', 8) => (DataType::Int64, vec![]),
            ('u', 1) => (DataType::UInt8, vec![]),
            ('u', 2) => (DataType::UInt16, vec![]),
            ('u', 4) => (DataType::UInt32, vec![]),
            ('u', 8) => (DataType::UInt64, vec![]),
            ('f', 2) => (DataType::Float16, vec![]),
            ('f', 4) => (DataType::Float32, vec![]),
            ('f', 8) => (DataType::Float64, vec![]),
            ('c', 8) => (DataType::Complex64, vec![]),
            ('c', 16) => (DataType::Complex128, vec![]),
            ('S', size) if size > 0 => (DataType::Char, vec![size]),
            ('V', size) if size > 0 => (DataType::Byte, vec![size]),
            _ => return Err(unsupported()),
        };

        let endianness = match order {
            '<' => Endianness::Little,
            '>' => Endianness::Big,
            '|' if data_type.size() == 1 => Endianness::native(),
            '|' => return Err(DataTypeMetadataError::MissingByteOrder(dtype.to_string())),
            _ => return Err(unsupported()),
        };

        Ok(Self {
            encoded_dtype: dtype.to_string(),
            data_type,
            endianness,
            flexible_shape,
        })
    }

    /// Return the canonical type string of `data_type` in native byte order.
    #[must_use]
    pub fn native_type_string(data_type: DataType) -> String {
        let order = if data_type.size() == 1 {
            '|'
        } else if Endianness::native() == Endianness::Little {
            '<'
        } else {
            '>'
        };
        let code = match data_type {
            DataType::Bool => "b1",
            DataType::Int8 => "i1",
            DataType::Int16 => "i2",
            DataType::Int32 => "i4",
            DataType::Int64 => "i8",
            DataType::UInt8 => "u1",
            DataType::UInt16 => "u2",
            DataType::UInt32 => "u4",
            DataType::UInt64 => "u8",
            DataType::Float16 => "f2",
            DataType::Float32 => "f4",
            DataType::Float64 => "f8",
            DataType::Complex64 => "c8",
            DataType::Complex128 => "c16",
            DataType::Char => "S1",
            DataType::Byte => "V1",
        };
        format!("{order}{code}")
    }
}

/// A field of a [`ZarrDType`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ZarrField {
    /// The scalar type of the field.
    pub base: BaseDataType,
    /// The field name (empty for an unstructured dtype).
    pub name: String,
    /// The declared subarray shape of the field.
    pub outer_shape: Vec<u64>,
    /// The trailing dimensions of the field: `outer_shape` followed by the flexible shape.
    pub field_shape: Vec<u64>,
    /// The number of elements of the field within one record.
    pub num_inner_elements: u64,
    /// The byte offset of the field within a record.
    pub byte_offset: usize,
    /// The number of bytes of the field within a record.
    pub num_bytes: usize,
}

impl ZarrField {
    /// The in-memory element type of the field.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.base.data_type
    }
}

/// A decoded Zarr V2 data type.
///
/// An unstructured data type has exactly one unnamed field.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ZarrDType {
    /// True if the data type is structured.
    pub has_fields: bool,
    /// The fields.
    pub fields: Vec<ZarrField>,
    /// The number of bytes of one record.
    pub bytes_per_outer_element: usize,
}

impl ZarrDType {
    /// Create an unstructured data type from an in-memory element type in native byte order.
    ///
    /// # Errors
    /// Returns a [`DataTypeMetadataError`] if the type string cannot be built.
    pub fn from_data_type(data_type: DataType) -> Result<Self, DataTypeMetadataError> {
        Self::parse(&DataTypeMetadataV2::Simple(
            BaseDataType::native_type_string(data_type),
        ))
    }

    /// Parse Zarr V2 data type metadata.
    ///
    /// # Errors
    /// Returns a [`DataTypeMetadataError`] if the metadata is invalid or unsupported.
    pub fn parse(metadata: &DataTypeMetadataV2) -> Result<Self, DataTypeMetadataError> {
        match metadata {
            DataTypeMetadataV2::Simple(dtype) => {
                let field = Self::make_field(String::new(), BaseDataType::parse(dtype)?, vec![], 0)?;
                Ok(Self {
                    has_fields: false,
                    bytes_per_outer_element: field.num_bytes,
                    fields: vec![field],
                })
            }
            DataTypeMetadataV2::Structured(structured) => {
                if structured.is_empty() {
                    return Err(DataTypeMetadataError::NoFields);
                }
                let mut fields: Vec<ZarrField> = Vec::with_capacity(structured.len());
                let mut byte_offset = 0usize;
                for field in structured {
                    if field.fieldname.is_empty() {
                        return Err(DataTypeMetadataError::EmptyFieldName);
                    }
                    if fields.iter().any(|other| other.name == field.fieldname) {
                        return Err(DataTypeMetadataError::DuplicateFieldName(
                            field.fieldname.clone(),
                        ));
                    }
                    let field = Self::make_field(
                        field.fieldname.clone(),
                        BaseDataType::parse(&field.datatype)?,
                        field.shape.clone().unwrap_or_default(),
                        byte_offset,
                    )?;
                    byte_offset = byte_offset
                        .checked_add(field.num_bytes)
                        .ok_or(DataTypeMetadataError::TooLarge)?;
                    fields.push(field);
                }
                Ok(Self {
                    has_fields: true,
                    fields,
                    bytes_per_outer_element: byte_offset,
                })
            }
        }
    }

    fn make_field(
        name: String,
        base: BaseDataType,
        outer_shape: Vec<u64>,
        byte_offset: usize,
    ) -> Result<ZarrField, DataTypeMetadataError> {
        let field_shape: Vec<u64> = outer_shape
            .iter()
            .chain(&base.flexible_shape)
            .copied()
            .collect();
        let num_inner_elements = field_shape
            .iter()
            .try_fold(1u64, |acc, &size| acc.checked_mul(size))
            .ok_or(DataTypeMetadataError::TooLarge)?;
        let num_bytes = usize::try_from(num_inner_elements)
            .ok()
            .and_then(|elements| elements.checked_mul(base.data_type.size()))
            .ok_or(DataTypeMetadataError::TooLarge)?;
        Ok(ZarrField {
            base,
            name,
            outer_shape,
            field_shape,
            num_inner_elements,
            byte_offset,
            num_bytes,
        })
    }

    /// Return the index of the field named `name`.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Convert to Zarr V2 data type metadata.
    #[must_use]
    pub fn to_metadata(&self) -> DataTypeMetadataV2 {
        if self.has_fields {
            DataTypeMetadataV2::Structured(
                self.fields
                    .iter()
                    .map(|field| DataTypeMetadataV2Structured {
                        fieldname: field.name.clone(),
                        datatype: field.base.encoded_dtype.clone(),
                        shape: (!field.outer_shape.is_empty()).then(|| field.outer_shape.clone()),
                    })
                    .collect(),
            )
        } else {
            DataTypeMetadataV2::Simple(self.fields[0].base.encoded_dtype.clone())
        }
    }
}

impl Serialize for ZarrDType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_metadata().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ZarrDType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let metadata = DataTypeMetadataV2::deserialize(deserializer)?;
        Self::parse(&metadata).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_data_types() {
        let base = BaseDataType::parse("<i4").unwrap();
        assert_eq!(base.data_type, DataType::Int32);
        assert_eq!(base.endianness, Endianness::Little);
        assert!(base.flexible_shape.is_empty());

        let base = BaseDataType::parse(">c16").unwrap();
        assert_eq!(base.data_type, DataType::Complex128);
        assert_eq!(base.endianness, Endianness::Big);

        let base = BaseDataType::parse("|S5").unwrap();
        assert_eq!(base.data_type, DataType::Char);
        assert_eq!(base.flexible_shape, vec![5]);

        assert!(BaseDataType::parse("|b1").is_ok());
        assert!(matches!(
            BaseDataType::parse("|i4"),
            Err(DataTypeMetadataError::MissingByteOrder(_))
        ));
        assert!(BaseDataType::parse("<i3").is_err());
        assert!(BaseDataType::parse("<S0").is_err());
        assert!(BaseDataType::parse("i4").is_err());
        assert!(BaseDataType::parse("<f").is_err());
        assert!(BaseDataType::parse("<M8").is_err());
    }

    #[test]
    fn structured_dtype() {
        let metadata: DataTypeMetadataV2 =
            serde_json::from_str(r#"[["x", "<u2"], ["y", ">f4", [2, 3]], ["s", "|S4"]]"#).unwrap();
        let dtype = ZarrDType::parse(&metadata).unwrap();
        assert!(dtype.has_fields);
        assert_eq!(dtype.fields.len(), 3);
        assert_eq!(dtype.fields[1].field_shape, vec![2, 3]);
        assert_eq!(dtype.fields[1].byte_offset, 2);
        assert_eq!(dtype.fields[1].num_bytes, 24);
        assert_eq!(dtype.fields[2].field_shape, vec![4]);
        assert_eq!(dtype.fields[2].byte_offset, 26);
        assert_eq!(dtype.bytes_per_outer_element, 30);
        assert_eq!(dtype.field_index("y"), Some(1));
        assert_eq!(dtype.field_index("z"), None);
        assert_eq!(dtype.to_metadata(), metadata);
    }

    #[test]
    fn structured_dtype_invalid() {
        let duplicate: DataTypeMetadataV2 =
            serde_json::from_str(r#"[["x", "<u2"], ["x", "<u2"]]"#).unwrap();
        assert!(matches!(
            ZarrDType::parse(&duplicate),
            Err(DataTypeMetadataError::DuplicateFieldName(_))
        ));
        let empty: DataTypeMetadataV2 = serde_json::from_str(r#"[["", "<u2"]]"#).unwrap();
        assert!(ZarrDType::parse(&empty).is_err());
        let none: DataTypeMetadataV2 = serde_json::from_str("[]").unwrap();
        assert!(ZarrDType::parse(&none).is_err());
    }

    #[test]
    fn native_type_string() {
        let dtype = ZarrDType::from_data_type(DataType::Int32).unwrap();
        assert_eq!(dtype.fields[0].data_type(), DataType::Int32);
        assert!(dtype.fields[0].base.endianness.is_native());
        assert_eq!(
            BaseDataType::native_type_string(DataType::UInt8),
            "|u1"
        );
    }
}
