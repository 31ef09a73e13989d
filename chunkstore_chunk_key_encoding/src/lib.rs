//! The chunk key encoding API for the `chunkstore` crate.
//!
//! A chunk key encoding maps chunk grid indices to a storage key.
//! The key of a chunk is the decimal representation of each chunk index joined by a [`DimensionSeparator`], with the first index emitted bare.
//! A chunk of a zero-dimensional array has the key `0`.

use derive_more::Display;
use itertools::Itertools;
use thiserror::Error;

/// A dimension separator.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Default)]
pub enum DimensionSeparator {
    /// The dot '.' character.
    #[default]
    #[display(".")]
    Dot,
    /// The slash '/' character.
    #[display("/")]
    Slash,
}

/// An invalid dimension separator.
#[derive(Clone, Debug, Error)]
#[error("dimension separator must be \".\" or \"/\", got {0:?}")]
pub struct DimensionSeparatorError(String);

impl DimensionSeparator {
    /// The separator as a character.
    #[must_use]
    pub const fn as_char(&self) -> char {
        match self {
            Self::Dot => '.',
            Self::Slash => '/',
        }
    }

    /// The separator as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dot => ".",
            Self::Slash => "/",
        }
    }
}

impl TryFrom<&str> for DimensionSeparator {
    type Error = DimensionSeparatorError;

    fn try_from(separator: &str) -> Result<Self, Self::Error> {
        match separator {
            "." => Ok(Self::Dot),
            "/" => Ok(Self::Slash),
            _ => Err(DimensionSeparatorError(separator.to_string())),
        }
    }
}

impl From<DimensionSeparator> for char {
    fn from(separator: DimensionSeparator) -> Self {
        separator.as_char()
    }
}

impl serde::Serialize for DimensionSeparator {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for DimensionSeparator {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let separator = String::deserialize(d)?;
        Self::try_from(separator.as_str()).map_err(serde::de::Error::custom)
    }
}

/// A chunk key encoding.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ChunkKeyEncoding {
    separator: DimensionSeparator,
}

impl ChunkKeyEncoding {
    /// Create a new chunk key encoding with separator `separator`.
    #[must_use]
    pub const fn new(separator: DimensionSeparator) -> Self {
        Self { separator }
    }

    /// Return the dimension separator.
    #[must_use]
    pub const fn separator(&self) -> DimensionSeparator {
        self.separator
    }

    /// Encode chunk grid indices to a key relative to an array prefix.
    #[must_use]
    pub fn encode(&self, chunk_indices: &[u64]) -> String {
        if chunk_indices.is_empty() {
            return "0".to_string();
        }
        // Use itoa for integer conversion, faster than format!
        let mut buffers = vec![itoa::Buffer::new(); chunk_indices.len()];
        chunk_indices
            .iter()
            .zip(&mut buffers)
            .map(|(&index, buffer)| buffer.format(index))
            .join(self.separator.as_str())
    }

    /// Encode chunk grid indices to a key under `prefix`.
    #[must_use]
    pub fn encode_with_prefix(&self, prefix: &str, chunk_indices: &[u64]) -> String {
        let mut key = prefix.to_string();
        key.push_str(&self.encode(chunk_indices));
        key
    }

    /// Decode a key relative to an array prefix back to chunk grid indices of dimensionality `rank`.
    ///
    /// Returns [`None`] if `key` is not a chunk key of that dimensionality.
    #[must_use]
    pub fn decode(&self, key: &str, rank: usize) -> Option<Vec<u64>> {
        if rank == 0 {
            return (key == "0").then(Vec::new);
        }
        let indices = key
            .split(self.separator.as_char())
            .map(|index| {
                if index.is_empty() || !index.bytes().all(|byte| byte.is_ascii_digit()) {
                    None
                } else {
                    index.parse::<u64>().ok()
                }
            })
            .collect::<Option<Vec<u64>>>()?;
        (indices.len() == rank).then_some(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_encoding_dot() {
        let encoding = ChunkKeyEncoding::new(DimensionSeparator::Dot);
        assert_eq!(encoding.encode(&[3, 12]), "3.12");
        assert_eq!(encoding.encode(&[0]), "0");
        assert_eq!(encoding.encode(&[]), "0");
        assert_eq!(encoding.encode_with_prefix("a/", &[1, 2, 3]), "a/1.2.3");
    }

    #[test]
    fn chunk_key_encoding_slash() {
        let encoding = ChunkKeyEncoding::new(DimensionSeparator::Slash);
        assert_eq!(encoding.encode(&[3, 12]), "3/12");
        assert_eq!(encoding.encode_with_prefix("a/", &[0, 0]), "a/0/0");
    }

    #[test]
    fn chunk_key_decode() {
        let encoding = ChunkKeyEncoding::new(DimensionSeparator::Dot);
        assert_eq!(encoding.decode("3.12", 2), Some(vec![3, 12]));
        assert_eq!(encoding.decode("3.12", 3), None);
        assert_eq!(encoding.decode(".zarray", 1), None);
        assert_eq!(encoding.decode("+1", 1), None);
        assert_eq!(encoding.decode("0", 0), Some(vec![]));
    }

    #[test]
    fn dimension_separator_serde() {
        let separator: DimensionSeparator = serde_json::from_str(r#""/""#).unwrap();
        assert_eq!(separator, DimensionSeparator::Slash);
        assert_eq!(
            serde_json::to_string(&DimensionSeparator::Dot).unwrap(),
            r#"".""#
        );
        assert!(serde_json::from_str::<DimensionSeparator>(r#""-""#).is_err());
    }
}
