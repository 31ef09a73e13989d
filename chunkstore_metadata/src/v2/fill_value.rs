//! Zarr V2 fill values.
//!
//! A fill value is decoded to one optional byte buffer per field, holding `num_inner_elements` elements in native byte order.
//!
//! Scalar data types use a JSON scalar (`"NaN"`, `"Infinity"` and `"-Infinity"` for non-finite floats, `[re, im]` for complex numbers).
//! Structured and flexible (`S`, `V`) data types use the base64 encoding of one stored record.

use base64::prelude::{Engine, BASE64_STANDARD};
use chunkstore_data_type::{convert_endianness, DataType};
use serde_json::Value;
use thiserror::Error;

use super::{ZarrDType, ZarrField};

/// Decoded fill values, one per field. [`None`] means the default (zero) value.
pub type FillValues = Vec<Option<Vec<u8>>>;

/// An invalid fill value.
#[derive(Clone, Debug, Error)]
pub enum FillValueError {
    /// A value that cannot be represented by the data type.
    #[error("invalid fill value {value} for dtype {dtype:?}")]
    Incompatible {
        /// The fill value.
        value: Value,
        /// The type string.
        dtype: String,
    },
    /// A base64 fill value that is not valid base64.
    #[error("fill value {0:?} is not valid base64")]
    Base64(String),
    /// A base64 fill value of the wrong length.
    #[error("fill value decodes to {actual} bytes, expected {expected}")]
    Length {
        /// Expected number of bytes.
        expected: usize,
        /// Decoded number of bytes.
        actual: usize,
    },
}

fn uses_base64(dtype: &ZarrDType) -> bool {
    dtype.has_fields || !dtype.fields[0].base.flexible_shape.is_empty()
}

/// Decode fill value metadata for `dtype`.
///
/// # Errors
/// Returns a [`FillValueError`] if `value` is not a valid fill value for `dtype`.
pub fn decode_fill_value(value: &Value, dtype: &ZarrDType) -> Result<FillValues, FillValueError> {
    if value.is_null() {
        return Ok(vec![None; dtype.fields.len()]);
    }
    if uses_base64(dtype) {
        let Value::String(encoded) = value else {
            return Err(FillValueError::Incompatible {
                value: value.clone(),
                dtype: encoded_dtype(dtype),
            });
        };
        let record = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| FillValueError::Base64(encoded.clone()))?;
        if record.len() != dtype.bytes_per_outer_element {
            return Err(FillValueError::Length {
                expected: dtype.bytes_per_outer_element,
                actual: record.len(),
            });
        }
        return Ok(dtype
            .fields
            .iter()
            .map(|field| {
                let mut bytes =
                    record[field.byte_offset..field.byte_offset + field.num_bytes].to_vec();
                convert_endianness(&mut bytes, field.data_type(), field.base.endianness);
                Some(bytes)
            })
            .collect());
    }

    let field = &dtype.fields[0];
    let incompatible = || FillValueError::Incompatible {
        value: value.clone(),
        dtype: field.base.encoded_dtype.clone(),
    };
    let bytes = decode_scalar(value, field.data_type()).ok_or_else(incompatible)?;
    Ok(vec![Some(bytes)])
}

fn decode_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(string) => match string.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

macro_rules! integer_bytes {
    ($value:expr, $as:ident, $ty:ty) => {
        $value
            .$as()
            .and_then(|integer| <$ty>::try_from(integer).ok())
            .map(|integer| integer.to_ne_bytes().to_vec())
    };
}

#[allow(clippy::cast_possible_truncation)]
fn decode_scalar(value: &Value, data_type: DataType) -> Option<Vec<u8>> {
    match data_type {
        DataType::Bool => match value {
            Value::Bool(boolean) => Some(vec![u8::from(*boolean)]),
            Value::Number(number) => match number.as_u64() {
                Some(0) => Some(vec![0]),
                Some(1) => Some(vec![1]),
                _ => None,
            },
            _ => None,
        },
        DataType::Int8 => integer_bytes!(value, as_i64, i8),
        DataType::Int16 => integer_bytes!(value, as_i64, i16),
        DataType::Int32 => integer_bytes!(value, as_i64, i32),
        DataType::Int64 => integer_bytes!(value, as_i64, i64),
        DataType::UInt8 => integer_bytes!(value, as_u64, u8),
        DataType::UInt16 => integer_bytes!(value, as_u64, u16),
        DataType::UInt32 => integer_bytes!(value, as_u64, u32),
        DataType::UInt64 => integer_bytes!(value, as_u64, u64),
        DataType::Float16 => {
            decode_float(value).map(|float| half::f16::from_f64(float).to_ne_bytes().to_vec())
        }
        DataType::Float32 => decode_float(value).map(|float| (float as f32).to_ne_bytes().to_vec()),
        DataType::Float64 => decode_float(value).map(|float| float.to_ne_bytes().to_vec()),
        DataType::Complex64 | DataType::Complex128 => {
            let Value::Array(parts) = value else {
                return None;
            };
            let [re, im] = parts.as_slice() else {
                return None;
            };
            let (re, im) = (decode_float(re)?, decode_float(im)?);
            if data_type == DataType::Complex64 {
                Some([(re as f32).to_ne_bytes(), (im as f32).to_ne_bytes()].concat())
            } else {
                Some([re.to_ne_bytes(), im.to_ne_bytes()].concat())
            }
        }
        DataType::Char | DataType::Byte => None,
    }
}

fn encode_float(float: f64) -> Value {
    if float.is_nan() {
        Value::from("NaN")
    } else if float.is_infinite() {
        Value::from(if float.is_sign_positive() {
            "Infinity"
        } else {
            "-Infinity"
        })
    } else {
        serde_json::Number::from_f64(float).map_or(Value::Null, Value::Number)
    }
}

fn encode_scalar(bytes: &[u8], data_type: DataType) -> Value {
    fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
        let mut array = [0u8; N];
        array.copy_from_slice(&bytes[..N]);
        array
    }
    match data_type {
        DataType::Bool => Value::Bool(bytes[0] != 0),
        DataType::Int8 => Value::from(i8::from_ne_bytes(array(bytes))),
        DataType::Int16 => Value::from(i16::from_ne_bytes(array(bytes))),
        DataType::Int32 => Value::from(i32::from_ne_bytes(array(bytes))),
        DataType::Int64 => Value::from(i64::from_ne_bytes(array(bytes))),
        DataType::UInt8 => Value::from(u8::from_ne_bytes(array(bytes))),
        DataType::UInt16 => Value::from(u16::from_ne_bytes(array(bytes))),
        DataType::UInt32 => Value::from(u32::from_ne_bytes(array(bytes))),
        DataType::UInt64 => Value::from(u64::from_ne_bytes(array(bytes))),
        DataType::Float16 => encode_float(half::f16::from_ne_bytes(array(bytes)).to_f64()),
        DataType::Float32 => encode_float(f64::from(f32::from_ne_bytes(array(bytes)))),
        DataType::Float64 => encode_float(f64::from_ne_bytes(array(bytes))),
        DataType::Complex64 => Value::Array(vec![
            encode_float(f64::from(f32::from_ne_bytes(array(bytes)))),
            encode_float(f64::from(f32::from_ne_bytes(array(&bytes[4..])))),
        ]),
        DataType::Complex128 => Value::Array(vec![
            encode_float(f64::from_ne_bytes(array(bytes))),
            encode_float(f64::from_ne_bytes(array(&bytes[8..]))),
        ]),
        DataType::Char | DataType::Byte => Value::Null,
    }
}

fn encoded_dtype(dtype: &ZarrDType) -> String {
    serde_json::to_string(&dtype.to_metadata()).unwrap_or_default()
}

/// Encode fill values of `dtype` to fill value metadata.
///
/// Returns `null` if any field has no fill value.
#[must_use]
pub fn encode_fill_value(dtype: &ZarrDType, fill_values: &FillValues) -> Value {
    if fill_values.len() != dtype.fields.len() || fill_values.iter().any(Option::is_none) {
        return Value::Null;
    }
    if uses_base64(dtype) {
        let mut record = vec![0u8; dtype.bytes_per_outer_element];
        for (field, fill_value) in dtype.fields.iter().zip(fill_values.iter().flatten()) {
            encode_field(field, fill_value, &mut record);
        }
        Value::String(BASE64_STANDARD.encode(record))
    } else {
        fill_values[0]
            .as_deref()
            .map_or(Value::Null, |bytes| encode_scalar(bytes, dtype.fields[0].data_type()))
    }
}

fn encode_field(field: &ZarrField, fill_value: &[u8], record: &mut [u8]) {
    let stored = &mut record[field.byte_offset..field.byte_offset + field.num_bytes];
    stored.copy_from_slice(fill_value);
    convert_endianness(stored, field.data_type(), field.base.endianness);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::v2::DataTypeMetadataV2;

    fn dtype(metadata: Value) -> ZarrDType {
        let metadata: DataTypeMetadataV2 = serde_json::from_value(metadata).unwrap();
        ZarrDType::parse(&metadata).unwrap()
    }

    #[test]
    fn fill_value_scalars() {
        let int32 = dtype(json!("<i4"));
        let fill = decode_fill_value(&json!(-7), &int32).unwrap();
        assert_eq!(fill, vec![Some((-7i32).to_ne_bytes().to_vec())]);
        assert_eq!(encode_fill_value(&int32, &fill), json!(-7));
        assert!(decode_fill_value(&json!(1.5), &int32).is_err());
        assert!(decode_fill_value(&json!("x"), &int32).is_err());

        let uint8 = dtype(json!("|u1"));
        assert!(decode_fill_value(&json!(256), &uint8).is_err());
        assert!(decode_fill_value(&json!(-1), &uint8).is_err());

        let float64 = dtype(json!(">f8"));
        let fill = decode_fill_value(&json!("NaN"), &float64).unwrap();
        assert!(f64::from_ne_bytes(fill[0].clone().unwrap().try_into().unwrap()).is_nan());
        assert_eq!(encode_fill_value(&float64, &fill), json!("NaN"));
        let fill = decode_fill_value(&json!("-Infinity"), &float64).unwrap();
        assert_eq!(encode_fill_value(&float64, &fill), json!("-Infinity"));
        let fill = decode_fill_value(&json!(0.5), &float64).unwrap();
        assert_eq!(encode_fill_value(&float64, &fill), json!(0.5));

        let float16 = dtype(json!("<f2"));
        let fill = decode_fill_value(&json!(1.5), &float16).unwrap();
        assert_eq!(encode_fill_value(&float16, &fill), json!(1.5));

        let boolean = dtype(json!("|b1"));
        assert_eq!(
            decode_fill_value(&json!(true), &boolean).unwrap(),
            vec![Some(vec![1])]
        );

        let complex = dtype(json!("<c8"));
        let fill = decode_fill_value(&json!([1.0, "NaN"]), &complex).unwrap();
        assert_eq!(encode_fill_value(&complex, &fill), json!([1.0, "NaN"]));
        assert!(decode_fill_value(&json!([1.0]), &complex).is_err());
    }

    #[test]
    fn fill_value_null() {
        let int32 = dtype(json!("<i4"));
        let fill = decode_fill_value(&Value::Null, &int32).unwrap();
        assert_eq!(fill, vec![None]);
        assert_eq!(encode_fill_value(&int32, &fill), Value::Null);
    }

    #[test]
    fn fill_value_structured() {
        let structured = dtype(json!([["a", ">u2"], ["b", "|S2"]]));
        // Stored record: a = 0x0102 big endian, b = "hi".
        let encoded = BASE64_STANDARD.encode([1u8, 2, b'h', b'i']);
        let fill = decode_fill_value(&json!(encoded), &structured).unwrap();
        assert_eq!(fill[0], Some(0x0102u16.to_ne_bytes().to_vec()));
        assert_eq!(fill[1], Some(b"hi".to_vec()));
        assert_eq!(encode_fill_value(&structured, &fill), json!(encoded));

        let short = BASE64_STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            decode_fill_value(&json!(short), &structured),
            Err(FillValueError::Length {
                expected: 4,
                actual: 3
            })
        ));
        assert!(decode_fill_value(&json!(5), &structured).is_err());
        assert!(decode_fill_value(&json!("!!"), &structured).is_err());
    }

    #[test]
    fn fill_value_flexible() {
        let string = dtype(json!("|S3"));
        let encoded = BASE64_STANDARD.encode(b"abc");
        let fill = decode_fill_value(&json!(encoded), &string).unwrap();
        assert_eq!(fill, vec![Some(b"abc".to_vec())]);
    }
}
