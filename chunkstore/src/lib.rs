//! `chunkstore` is a chunked N-dimensional array engine over key-value stores.
//!
//! An array is described by a JSON [`Spec`](spec::Spec): the format driver, the key-value store holding the array, constraints on the format metadata and a [`Schema`](schema::Schema).
//! Opening a specification binds its [`Context`](context::Context) resources, reads or creates the format metadata, selects a field, and returns a [`Driver`](driver::Driver) that reads, writes, and resizes the array.
//!
//! Drivers opened from specifications that observe the same stored data share one metadata cache entry and one chunk cache through the `cache_pool` context resource.
//!
//! ## Formats
//! | driver | format   |
//! |--------|----------|
//! | `zarr` | Zarr V2  |
//!
//! Formats over a key-value store are built on [`kvs_backed_chunk_driver`].
//! Further formats and key-value stores are registered as plugins with [`inventory::submit`].
//!
//! ## Logging
//! `chunkstore` logs information and warnings using the [`log`] crate.
//! A logging implementation must be enabled to capture logs.
//!
//! ## Example
//! ```rust
//! # use chunkstore::{chunk_grid::{ArraySubset, SharedArray}, context::Context, spec::{open, SpecOptions}};
//! # futures::executor::block_on(async {
//! let context = Context::default();
//! let json = serde_json::json!({
//!     "driver": "zarr",
//!     "kvstore": {"driver": "memory"},
//!     "path": "a/",
//!     "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4"},
//!     "create": true,
//! });
//! let driver = open(&json, &context, &SpecOptions::default()).await?;
//! let region = ArraySubset::new_with_ranges(&[0..2, 1..3]);
//! driver
//!     .write(&region, &SharedArray::from_elements(vec![2, 2], &[1i32, 2, 3, 4])?)
//!     .await?;
//! assert_eq!(driver.read(&region).await?.to_elements::<i32>()?, vec![1, 2, 3, 4]);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod cache_key;
mod chunk_cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod driver;
mod error;
pub mod kvs_backed_chunk_driver;
pub mod kvstore;
pub mod metadata_cache;
pub mod schema;
pub mod spec;
pub mod zarr;

pub use error::{DriverError, ErrorKind};

pub use chunkstore_chunk_grid as chunk_grid;
pub use chunkstore_chunk_key_encoding as chunk_key_encoding;
pub use chunkstore_data_type as data_type;
pub use chunkstore_metadata as metadata;
pub use chunkstore_plugin as plugin;
pub use chunkstore_storage as storage;
