use crate::PluginCreateError;

/// A plugin.
pub struct Plugin<TPlugin, TInput> {
    /// The unique identifier of the plugin.
    identifier: &'static str,
    /// Create an implementation of this plugin from an input.
    create_fn: fn(input: &TInput) -> Result<TPlugin, PluginCreateError>,
}

impl<TPlugin, TInput> Plugin<TPlugin, TInput> {
    /// Create a new plugin for registration.
    pub const fn new(
        identifier: &'static str,
        create_fn: fn(input: &TInput) -> Result<TPlugin, PluginCreateError>,
    ) -> Self {
        Self {
            identifier,
            create_fn,
        }
    }

    /// Create a `TPlugin` plugin from `input`.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginCreateError`] if plugin creation fails due to either:
    ///  - the input is invalid, or
    ///  - some other reason specific to the plugin.
    pub fn create(&self, input: &TInput) -> Result<TPlugin, PluginCreateError> {
        (self.create_fn)(input)
    }

    /// Return the unique identifier of the plugin.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        self.identifier
    }
}

impl<TPlugin, TInput> std::fmt::Debug for Plugin<TPlugin, TInput> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

/// Plugins that can be held in a [`Registry`](crate::Registry).
pub trait PluginIdentifier: Sync + 'static {
    /// The unique identifier of the plugin.
    fn identifier(&self) -> &'static str;
}

impl<TPlugin: 'static, TInput: 'static> PluginIdentifier for Plugin<TPlugin, TInput> {
    fn identifier(&self) -> &'static str {
        self.identifier
    }
}
