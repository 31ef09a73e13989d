//! Key-value store specifications.
//!
//! A [`KvStoreSpec`] names a key-value store driver, its driver-specific members, and a key prefix (`path`).
//! It has a JSON object form and a URL form:
//! ```json
//! {"driver": "memory", "path": "a/", "memory_key_value_store": "memory_key_value_store#b"}
//! ```
//! ```json
//! "memory://a/"
//! ```
//! Key-value store drivers are plugins, registered with [`inventory::submit`] as a [`KvStoreDriverPlugin`] or at runtime with [`register_kvstore_driver`].

use std::sync::Arc;

use chunkstore_plugin::{Plugin, PluginIdentifier, Registry};
use chunkstore_storage::AsyncReadableWritableStorage;
use serde_json::{Map, Value};

use crate::cache_key::CacheKeyEncoder;
use crate::context::{
    Context, ContextResource, ContextResourceSpec, ContextResourceTraits, MemoryKeyValueStore,
};
use crate::DriverError;

/// Traits for the driver-specific part of a key-value store specification.
pub trait KvStoreDriverSpecTraits: std::fmt::Debug + Send + Sync {
    /// The driver identifier.
    fn driver_id(&self) -> &'static str;

    /// The driver-specific JSON members.
    fn to_json(&self) -> Map<String, Value>;

    /// Resolve context resources.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if a resource cannot be resolved.
    fn bind_context(
        &self,
        context: &Context,
    ) -> Result<Arc<dyn KvStoreDriverSpecTraits>, DriverError>;

    /// Drop context resources.
    fn strip_context(&self) -> Arc<dyn KvStoreDriverSpecTraits>;

    /// Open the store.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification is not bound or the store cannot be opened.
    fn open(&self) -> Result<AsyncReadableWritableStorage, DriverError>;

    /// Encode the identity of the store. Specifications that open the same store encode equal keys.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification is not bound.
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) -> Result<(), DriverError>;
}

/// A key-value store driver plugin. Created from the driver-specific JSON members.
pub struct KvStoreDriverPlugin(
    Plugin<Arc<dyn KvStoreDriverSpecTraits>, Map<String, Value>>,
);
inventory::collect!(KvStoreDriverPlugin);

impl KvStoreDriverPlugin {
    /// Create a new key-value store driver plugin.
    pub const fn new(
        identifier: &'static str,
        create_fn: fn(
            &Map<String, Value>,
        )
            -> Result<Arc<dyn KvStoreDriverSpecTraits>, chunkstore_plugin::PluginCreateError>,
    ) -> Self {
        Self(Plugin::new(identifier, create_fn))
    }
}

impl PluginIdentifier for KvStoreDriverPlugin {
    fn identifier(&self) -> &'static str {
        self.0.identifier()
    }
}

static KVSTORE_DRIVERS: Registry<KvStoreDriverPlugin> = Registry::new("kvstore driver");

/// Register a key-value store driver at runtime.
///
/// # Panics
/// Panics if a driver with the same identifier is already registered.
pub fn register_kvstore_driver(plugin: KvStoreDriverPlugin) {
    KVSTORE_DRIVERS.register(plugin);
}

/// A key-value store specification.
#[derive(Clone, Debug)]
pub struct KvStoreSpec {
    driver: Arc<dyn KvStoreDriverSpecTraits>,
    path: String,
}

impl KvStoreSpec {
    /// Parse a key-value store specification from its JSON object or URL form.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if the driver is missing or unknown, or its members are invalid.
    pub fn from_json(json: &Value) -> Result<Self, DriverError> {
        match json {
            Value::String(url) => Self::from_url(url),
            Value::Object(members) => {
                let mut members = members.clone();
                let driver = match members.remove("driver") {
                    Some(Value::String(driver)) => driver,
                    Some(driver) => {
                        return Err(DriverError::invalid_argument(format!(
                            "invalid kvstore \"driver\": {driver}"
                        )))
                    }
                    None => {
                        return Err(DriverError::invalid_argument(
                            "kvstore \"driver\" must be specified",
                        ))
                    }
                };
                let path = match members.remove("path") {
                    Some(Value::String(path)) => path,
                    None => String::new(),
                    Some(path) => {
                        return Err(DriverError::invalid_argument(format!(
                            "invalid kvstore \"path\": {path}"
                        )))
                    }
                };
                Self::new(&driver, &members, path)
            }
            json => Err(DriverError::invalid_argument(format!(
                "invalid kvstore specification: {json}"
            ))),
        }
    }

    /// Parse a `<driver>://<path>` URL. The path is percent-decoded.
    fn from_url(s: &str) -> Result<Self, DriverError> {
        let invalid = |reason: &dyn std::fmt::Display| {
            DriverError::invalid_argument(format!("invalid kvstore URL {s:?}: {reason}"))
        };
        let url = url::Url::parse(s).map_err(|err| invalid(&err))?;
        if url.cannot_be_a_base() {
            return Err(invalid(&"expected <driver>://<path>"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid(&"query and fragment are not supported"));
        }
        let path = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        let path = urlencoding::decode(&path).map_err(|err| invalid(&err))?;
        Self::new(url.scheme(), &Map::new(), path.into_owned())
    }

    fn new(driver: &str, members: &Map<String, Value>, path: String) -> Result<Self, DriverError> {
        let plugin = KVSTORE_DRIVERS.get(driver).ok_or_else(|| {
            DriverError::invalid_argument(format!("unsupported kvstore driver {driver:?}"))
        })?;
        let driver = plugin.0.create(members).map_err(|err| {
            DriverError::invalid_argument(format!("invalid {driver:?} kvstore: {err}"))
        })?;
        Ok(Self { driver, path })
    }

    /// The JSON object form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut json = Map::new();
        json.insert("driver".to_string(), self.driver.driver_id().into());
        if !self.path.is_empty() {
            json.insert("path".to_string(), self.path.clone().into());
        }
        json.extend(self.driver.to_json());
        Value::Object(json)
    }

    /// The driver identifier.
    #[must_use]
    pub fn driver_id(&self) -> &'static str {
        self.driver.driver_id()
    }

    /// The key prefix.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append `path` to the key prefix, separated by `/`.
    #[must_use]
    pub fn join_path(&self, path: &str) -> String {
        if self.path.is_empty() || self.path.ends_with('/') || path.is_empty() {
            format!("{}{path}", self.path)
        } else {
            format!("{}/{path}", self.path)
        }
    }

    /// Resolve context resources.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if a resource cannot be resolved.
    pub fn bind_context(&self, context: &Context) -> Result<Self, DriverError> {
        Ok(Self {
            driver: self.driver.bind_context(context)?,
            path: self.path.clone(),
        })
    }

    /// Drop context resources.
    #[must_use]
    pub fn strip_context(&self) -> Self {
        Self {
            driver: self.driver.strip_context(),
            path: self.path.clone(),
        }
    }

    /// Open the store.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification is not bound or the store cannot be opened.
    pub fn open(&self) -> Result<AsyncReadableWritableStorage, DriverError> {
        self.driver.open()
    }

    /// The cache key identifying the store, excluding the path.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification is not bound.
    pub fn cache_key(&self) -> Result<String, DriverError> {
        let mut encoder = CacheKeyEncoder::new();
        encoder.encode(self.driver.driver_id());
        self.driver.encode_cache_key(&mut encoder)?;
        Ok(encoder.finish())
    }
}

/// The `memory` key-value store driver.
#[derive(Clone, Debug, Default)]
pub struct MemoryKvStoreSpec {
    memory_key_value_store: ContextResource<MemoryKeyValueStore>,
}

inventory::submit! {
    KvStoreDriverPlugin::new("memory", create_memory_kvstore)
}

fn create_memory_kvstore(
    members: &Map<String, Value>,
) -> Result<Arc<dyn KvStoreDriverSpecTraits>, chunkstore_plugin::PluginCreateError> {
    let mut spec = MemoryKvStoreSpec::default();
    for (name, value) in members {
        match name.as_str() {
            "memory_key_value_store" => {
                spec.memory_key_value_store =
                    ContextResource::new(ContextResourceSpec::from_json(value));
            }
            // Ignored for compatibility.
            "atomic" | "context" => {}
            name => {
                return Err(chunkstore_plugin::PluginConfigurationInvalidError::new(format!(
                    "unknown member {name:?}"
                ))
                .into())
            }
        }
    }
    Ok(Arc::new(spec))
}

impl KvStoreDriverSpecTraits for MemoryKvStoreSpec {
    fn driver_id(&self) -> &'static str {
        "memory"
    }

    fn to_json(&self) -> Map<String, Value> {
        let mut json = Map::new();
        if let Some(resource) = self.memory_key_value_store.spec().to_json() {
            json.insert(MemoryKeyValueStore::ID.to_string(), resource);
        }
        json
    }

    fn bind_context(
        &self,
        context: &Context,
    ) -> Result<Arc<dyn KvStoreDriverSpecTraits>, DriverError> {
        Ok(Arc::new(Self {
            memory_key_value_store: self.memory_key_value_store.bind(context)?,
        }))
    }

    fn strip_context(&self) -> Arc<dyn KvStoreDriverSpecTraits> {
        Arc::new(Self {
            memory_key_value_store: self.memory_key_value_store.strip(),
        })
    }

    fn open(&self) -> Result<AsyncReadableWritableStorage, DriverError> {
        Ok(self.memory_key_value_store.get()?.store().clone())
    }

    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) -> Result<(), DriverError> {
        encoder.encode(&self.memory_key_value_store.get()?.resource_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn kvstore_spec_json() {
        let spec = KvStoreSpec::from_json(&json!({"driver": "memory", "path": "a/"})).unwrap();
        assert_eq!(spec.driver_id(), "memory");
        assert_eq!(spec.path(), "a/");
        assert_eq!(spec.to_json(), json!({"driver": "memory", "path": "a/"}));

        let spec = KvStoreSpec::from_json(&json!("memory://b/")).unwrap();
        assert_eq!(spec.path(), "b/");
        assert_eq!(spec.join_path("c/"), "b/c/");
        let spec = KvStoreSpec::from_json(&json!("memory://b")).unwrap();
        assert_eq!(spec.join_path("c/"), "b/c/");
        assert_eq!(spec.join_path(""), "b");
        let spec = KvStoreSpec::from_json(&json!({"driver": "memory"})).unwrap();
        assert_eq!(spec.join_path("c/"), "c/");

        let spec = KvStoreSpec::from_json(&json!({
            "driver": "memory",
            "memory_key_value_store": "memory_key_value_store#x"
        }))
        .unwrap();
        assert_eq!(
            spec.to_json(),
            json!({"driver": "memory", "memory_key_value_store": "memory_key_value_store#x"})
        );
        assert_eq!(
            spec.strip_context().to_json(),
            json!({"driver": "memory"})
        );
    }

    #[test]
    fn kvstore_spec_url() {
        let spec = KvStoreSpec::from_json(&json!("MEMORY://a/b/")).unwrap();
        assert_eq!(spec.driver_id(), "memory");
        assert_eq!(spec.path(), "a/b/");
        let spec = KvStoreSpec::from_json(&json!("memory://a%2Fb/c%20d")).unwrap();
        assert_eq!(spec.path(), "a/b/c d");
        let spec = KvStoreSpec::from_json(&json!("memory://")).unwrap();
        assert_eq!(spec.path(), "");
    }

    #[test]
    fn kvstore_spec_invalid() {
        for json in [
            json!({"path": "a/"}),
            json!({"driver": "unknown"}),
            json!({"driver": "memory", "extra": 1}),
            json!("unknown://a"),
            json!("memory"),
            json!("memory:a"),
            json!("memory://a?b=c"),
            json!("memory://a#b"),
            json!(1),
        ] {
            let error = KvStoreSpec::from_json(&json).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument, "{json}");
        }
    }

    #[test]
    fn kvstore_spec_cache_key() {
        let context = Context::default();
        let spec = KvStoreSpec::from_json(&json!("memory://a/")).unwrap();
        assert!(spec.cache_key().is_err());
        let a = spec.bind_context(&context).unwrap();
        let b = KvStoreSpec::from_json(&json!("memory://other/"))
            .unwrap()
            .bind_context(&context)
            .unwrap();
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
        let c = spec.bind_context(&Context::default()).unwrap();
        assert_ne!(a.cache_key().unwrap(), c.cache_key().unwrap());
        assert!(a.open().is_ok());
    }
}
