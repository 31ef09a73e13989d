//! The plugin API for the `chunkstore` crate.
//!
//! A [`Plugin`] creates a concrete implementation of an extension point (a driver, a key-value store, a compressor) from an input.
//! Plugins are identified by a unique identifier string.
//!
//! Plugins are registered at compile time using the [`inventory`](https://docs.rs/inventory/latest/inventory/) crate, or at runtime with [`Registry::register`].
//! A [`Registry`] unifies both sources and looks plugins up by identifier.
//! Registrations persist for the lifetime of the process.

use thiserror::Error;

mod plugin;
pub use plugin::{Plugin, PluginIdentifier};

mod registry;
pub use registry::Registry;

/// An unsupported plugin error.
#[derive(Clone, Debug, Error)]
#[error("{plugin_type} {identifier:?} is not registered")]
pub struct PluginUnsupportedError {
    identifier: String,
    plugin_type: String,
}

impl PluginUnsupportedError {
    /// Create a new [`PluginUnsupportedError`].
    #[must_use]
    pub fn new(identifier: String, plugin_type: String) -> Self {
        Self {
            identifier,
            plugin_type,
        }
    }

    /// The identifier that was looked up.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// An invalid plugin configuration error.
#[derive(Clone, Debug, Error)]
#[error("configuration is invalid: {reason}")]
pub struct PluginConfigurationInvalidError {
    reason: String,
}

impl PluginConfigurationInvalidError {
    /// Create a new [`PluginConfigurationInvalidError`].
    #[must_use]
    pub fn new(reason: String) -> Self {
        Self { reason }
    }
}

/// A plugin creation error.
#[derive(Clone, Debug, Error)]
pub enum PluginCreateError {
    /// An unsupported plugin.
    #[error(transparent)]
    Unsupported(#[from] PluginUnsupportedError),
    /// Invalid configuration.
    #[error(transparent)]
    ConfigurationInvalid(#[from] PluginConfigurationInvalidError),
    /// Other
    #[error("{_0}")]
    Other(String),
}

impl From<&str> for PluginCreateError {
    fn from(err_string: &str) -> Self {
        Self::Other(err_string.to_string())
    }
}

impl From<String> for PluginCreateError {
    fn from(err_string: String) -> Self {
        Self::Other(err_string)
    }
}
