//! An identifier-keyed plugin registry.
//!
//! Combines plugins submitted at compile time through [`inventory`] with plugins registered at runtime.

use std::collections::BTreeMap;
use std::sync::{OnceLock, RwLock};

use crate::PluginIdentifier;

/// A registry of plugins keyed by their identifier.
///
/// Registering two plugins with the same identifier is a programming error and panics.
/// Plugins are never unregistered.
#[derive(Debug)]
pub struct Registry<P: 'static> {
    kind: &'static str,
    plugins: OnceLock<RwLock<BTreeMap<&'static str, &'static P>>>,
}

impl<P> Registry<P>
where
    P: PluginIdentifier + inventory::Collect,
{
    /// Create a new registry for plugins of `kind` (used in panic messages).
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            plugins: OnceLock::new(),
        }
    }

    fn plugins(&self) -> &RwLock<BTreeMap<&'static str, &'static P>> {
        self.plugins.get_or_init(|| {
            let mut plugins = BTreeMap::new();
            for plugin in inventory::iter::<P> {
                let identifier = plugin.identifier();
                assert!(
                    plugins.insert(identifier, plugin).is_none(),
                    "duplicate registration of {} \"{identifier}\"",
                    self.kind
                );
            }
            RwLock::new(plugins)
        })
    }

    /// Register a plugin at runtime.
    ///
    /// # Panics
    /// Panics if a plugin with the same identifier is already registered, or if the internal lock is poisoned.
    pub fn register(&self, plugin: P) -> &'static P {
        let identifier = plugin.identifier();
        let mut plugins = self.plugins().write().unwrap();
        assert!(
            !plugins.contains_key(identifier),
            "duplicate registration of {} \"{identifier}\"",
            self.kind
        );
        let plugin: &'static P = Box::leak(Box::new(plugin));
        plugins.insert(identifier, plugin);
        plugin
    }

    /// Return the plugin registered with `identifier`.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&'static P> {
        self.plugins().read().unwrap().get(identifier).copied()
    }

    /// Return the identifiers of all registered plugins in sorted order.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&'static str> {
        self.plugins().read().unwrap().keys().copied().collect()
    }
}
