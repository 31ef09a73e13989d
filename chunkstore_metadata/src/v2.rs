//! Zarr V2 metadata.

mod array;
pub use array::{ArrayMetadataV2, ArrayMetadataV2Error, ArrayMetadataV2Order, ZarrMetadata};

mod data_type;
pub use data_type::{
    BaseDataType, DataTypeMetadataError, DataTypeMetadataV2, DataTypeMetadataV2Structured,
    ZarrDType, ZarrField,
};

mod fill_value;
pub use fill_value::{decode_fill_value, encode_fill_value, FillValueError, FillValues};

mod metadata;
pub use metadata::MetadataV2;

mod partial;
pub use partial::{MetadataMismatchError, ZarrPartialMetadata};

/// The key suffix of array metadata.
pub const ZARR_METADATA_KEY: &str = ".zarray";
