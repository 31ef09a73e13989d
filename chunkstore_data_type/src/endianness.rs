use crate::DataType;

/// Byte order of a multi-byte value.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Endianness {
    /// Little endian.
    Little,
    /// Big endian.
    Big,
}

impl Endianness {
    /// The byte order of the target platform.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// Returns true if this is the byte order of the target platform.
    #[must_use]
    pub fn is_native(&self) -> bool {
        *self == Self::native()
    }
}

/// Convert elements of `data_type` between `endianness` and native byte order, in place.
///
/// The conversion is its own inverse.
pub fn convert_endianness(bytes: &mut [u8], data_type: DataType, endianness: Endianness) {
    let swap_size = data_type.swap_size();
    if endianness.is_native() || swap_size == 1 {
        return;
    }
    for unit in bytes.chunks_exact_mut(swap_size) {
        unit.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_endianness_swaps_units() {
        let foreign = if Endianness::native() == Endianness::Little {
            Endianness::Big
        } else {
            Endianness::Little
        };
        let mut bytes = vec![1, 2, 3, 4, 5, 6, 7, 8];
        convert_endianness(&mut bytes, DataType::UInt16, Endianness::native());
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        convert_endianness(&mut bytes, DataType::UInt16, foreign);
        assert_eq!(bytes, vec![2, 1, 4, 3, 6, 5, 8, 7]);
        let mut bytes = vec![1, 2, 3, 4, 5, 6, 7, 8];
        convert_endianness(&mut bytes, DataType::Complex64, foreign);
        assert_eq!(bytes, vec![4, 3, 2, 1, 8, 7, 6, 5]);
        let mut bytes = vec![1, 2];
        convert_endianness(&mut bytes, DataType::Char, foreign);
        assert_eq!(bytes, vec![1, 2]);
    }
}
