use serde::{Deserialize, Serialize};

use crate::Configuration;

/// Zarr V2 generic codec metadata with an `id` and optional flattened `configuration`.
///
/// For example:
/// ```json
/// {
///     "id": "zlib",
///     "level": 5
/// }
/// ```
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
pub struct MetadataV2 {
    id: String,
    #[serde(flatten)]
    configuration: Configuration,
}

impl MetadataV2 {
    /// Create codec metadata from an `id` and configuration.
    #[must_use]
    pub fn new(id: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            id: id.into(),
            configuration,
        }
    }

    /// Return the value of the `id` field.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Return the configuration, which includes all fields excluding the `id`.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}
