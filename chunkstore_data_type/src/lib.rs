//! The element data types of the `chunkstore` crate.
//!
//! A [`DataType`] describes the in-memory representation of one array element.
//! Elements are held in native byte order; a format driver converts to and from its stored byte order.
//!
//! The [`Element`] trait maps Rust types onto data types for typed access to raw element bytes.

mod data_type;
pub use data_type::{DataType, DataTypeNameError};

mod element;
pub use element::{Element, ElementError};

mod endianness;
pub use endianness::{convert_endianness, Endianness};
