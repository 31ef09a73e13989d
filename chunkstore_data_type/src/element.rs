use thiserror::Error;

use crate::DataType;

/// An element error.
#[derive(Clone, Debug, Error)]
pub enum ElementError {
    /// Incompatible element type for data type.
    #[error("element type is incompatible with data type {0}")]
    IncompatibleElementType(DataType),
    /// The number of bytes is not a multiple of the element size.
    #[error("{0} bytes is not a multiple of the element size {1}")]
    InvalidLength(usize, usize),
    /// Invalid element value.
    #[error("invalid element value for data type {0}")]
    InvalidElementValue(DataType),
}

/// A trait representing an array element type.
pub trait Element: Sized + Clone {
    /// The data type of the element.
    const DATA_TYPE: DataType;

    /// Validate that `data_type` matches the element type.
    ///
    /// # Errors
    /// Returns [`ElementError::IncompatibleElementType`] if the data type is incompatible.
    fn validate_data_type(data_type: DataType) -> Result<(), ElementError> {
        if data_type == Self::DATA_TYPE {
            Ok(())
        } else {
            Err(ElementError::IncompatibleElementType(data_type))
        }
    }

    /// Convert a slice of elements into native-endian bytes.
    fn to_bytes(elements: &[Self]) -> Vec<u8>;

    /// Convert native-endian bytes into elements.
    ///
    /// # Errors
    /// Returns an [`ElementError`] if the bytes do not hold a whole number of valid elements.
    fn from_bytes(bytes: &[u8]) -> Result<Vec<Self>, ElementError>;
}

macro_rules! impl_element_pod {
    ($raw_type:ty, $data_type:expr) => {
        impl Element for $raw_type {
            const DATA_TYPE: DataType = $data_type;

            fn to_bytes(elements: &[Self]) -> Vec<u8> {
                bytemuck::cast_slice(elements).to_vec()
            }

            fn from_bytes(bytes: &[u8]) -> Result<Vec<Self>, ElementError> {
                let size = std::mem::size_of::<Self>();
                if bytes.len() % size != 0 {
                    return Err(ElementError::InvalidLength(bytes.len(), size));
                }
                Ok(bytes
                    .chunks_exact(size)
                    .map(bytemuck::pod_read_unaligned)
                    .collect())
            }
        }
    };
}

impl_element_pod!(i8, DataType::Int8);
impl_element_pod!(i16, DataType::Int16);
impl_element_pod!(i32, DataType::Int32);
impl_element_pod!(i64, DataType::Int64);
impl_element_pod!(u8, DataType::UInt8);
impl_element_pod!(u16, DataType::UInt16);
impl_element_pod!(u32, DataType::UInt32);
impl_element_pod!(u64, DataType::UInt64);
impl_element_pod!(half::f16, DataType::Float16);
impl_element_pod!(f32, DataType::Float32);
impl_element_pod!(f64, DataType::Float64);
impl_element_pod!(num_complex::Complex32, DataType::Complex64);
impl_element_pod!(num_complex::Complex64, DataType::Complex128);

impl Element for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn to_bytes(elements: &[Self]) -> Vec<u8> {
        elements.iter().map(|&element| u8::from(element)).collect()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Vec<Self>, ElementError> {
        bytes
            .iter()
            .map(|byte| match byte {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(ElementError::InvalidElementValue(DataType::Bool)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_bytes() {
        let bytes = i32::to_bytes(&[1, -2]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i32::from_bytes(&bytes).unwrap(), vec![1, -2]);
        assert!(i32::from_bytes(&bytes[1..]).is_err());
        assert!(i32::validate_data_type(DataType::Int32).is_ok());
        assert!(i32::validate_data_type(DataType::UInt32).is_err());

        assert_eq!(bool::to_bytes(&[true, false]), vec![1, 0]);
        assert!(bool::from_bytes(&[2]).is_err());

        let complex = num_complex::Complex32::new(1.0, -1.0);
        let bytes = num_complex::Complex32::to_bytes(&[complex]);
        assert_eq!(num_complex::Complex32::from_bytes(&bytes).unwrap(), vec![complex]);
    }
}
