//! Zarr V2 array metadata support for the `chunkstore` crate.
//!
//! [`v2::ArrayMetadataV2`] is the JSON document stored in a `.zarray` key.
//! [`v2::ZarrMetadata`] is its decoded and validated form, with the data type parsed into fields and the fill value decoded to native-endian bytes.
//! [`v2::ZarrPartialMetadata`] is a set of optional constraints on metadata.

pub mod v2;

/// An array shape. Dimensions may be zero.
pub type ArrayShape = Vec<u64>;

/// A chunk shape. Dimensions are nonzero.
pub type ChunkShape = Vec<u64>;

/// Generic configuration members of a codec.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

pub use chunkstore_data_type::Endianness;
