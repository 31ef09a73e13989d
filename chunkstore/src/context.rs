//! Shared resources referenced by specifications.
//!
//! A [`Context`] is a JSON object mapping resource names to resource configurations, e.g.
//! ```json
//! {
//!     "cache_pool": {"total_bytes_limit": 10000000},
//!     "cache_pool#small": {"total_bytes_limit": 1000},
//!     "data_copy_concurrency": {"limit": 4}
//! }
//! ```
//! A resource name is a resource identifier optionally followed by `#` and a label.
//! A specification refers to a resource by name (`"cache_pool#small"`), by inline configuration, or implicitly by the default name (the identifier).
//!
//! Resources are created once per context on first use and shared by every specification bound to that context.
//! A default resource that is not configured anywhere in the context chain is created in the root context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chunkstore_storage::store::MemoryStore;
use futures::executor::ThreadPool;
use serde::Deserialize;
use serde_json::Value;

use crate::chunk_cache::ChunkCache;
use crate::config::global_config;
use crate::DriverError;

fn next_resource_id() -> u64 {
    static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Traits for a context resource.
pub trait ContextResourceTraits: Send + Sync + Sized + 'static {
    /// The resource identifier and default name.
    const ID: &'static str;

    /// Create the resource from its JSON configuration.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the configuration is invalid.
    fn from_json(json: &Value) -> Result<Self, DriverError>;

    /// A process-unique identity of this resource instance.
    fn resource_id(&self) -> u64;
}

/// How a specification refers to a context resource.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ContextResourceSpec {
    /// The default resource of the context.
    #[default]
    Default,
    /// A named resource of the context.
    Reference(String),
    /// A resource configured inline, not shared with other specifications.
    Inline(Value),
}

impl ContextResourceSpec {
    /// Parse a resource reference. A string is a name, anything else is an inline configuration.
    #[must_use]
    pub fn from_json(json: &Value) -> Self {
        match json {
            Value::String(name) => Self::Reference(name.clone()),
            json => Self::Inline(json.clone()),
        }
    }

    /// The JSON form of the reference, or [`None`] for the default resource.
    #[must_use]
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Default => None,
            Self::Reference(name) => Some(Value::String(name.clone())),
            Self::Inline(json) => Some(json.clone()),
        }
    }
}

struct ContextInner {
    spec: serde_json::Map<String, Value>,
    parent: Option<Context>,
    resources: parking_lot::Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

/// A set of shared resources.
///
/// Cloning a context is cheap and shares its resources.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("spec", &self.0.spec)
            .field("parent", &self.0.parent)
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new_with_parent(serde_json::Map::new(), None)
    }
}

impl Context {
    fn new_with_parent(spec: serde_json::Map<String, Value>, parent: Option<Self>) -> Self {
        Self(Arc::new(ContextInner {
            spec,
            parent,
            resources: parking_lot::Mutex::default(),
        }))
    }

    fn validate_spec(json: Value) -> Result<serde_json::Map<String, Value>, DriverError> {
        let Value::Object(spec) = json else {
            return Err(DriverError::invalid_argument(format!(
                "context must be a JSON object, got {json}"
            )));
        };
        if let Some(name) = spec
            .keys()
            .find(|name| name.is_empty() || name.starts_with('#'))
        {
            return Err(DriverError::invalid_argument(format!(
                "invalid context resource name {name:?}"
            )));
        }
        Ok(spec)
    }

    /// Create a root context from its JSON specification.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if `json` is not an object of resource names.
    pub fn from_json(json: Value) -> Result<Self, DriverError> {
        Ok(Self::new_with_parent(Self::validate_spec(json)?, None))
    }

    /// Create a child context. Names not configured in the child resolve in this context.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if `json` is not an object of resource names.
    pub fn new_child(&self, json: Value) -> Result<Self, DriverError> {
        Ok(Self::new_with_parent(
            Self::validate_spec(json)?,
            Some(self.clone()),
        ))
    }

    /// Resolve a resource.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) if a named resource is not configured, or [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if a reference names a different kind of resource or the configuration is invalid.
    pub fn get<R: ContextResourceTraits>(
        &self,
        spec: &ContextResourceSpec,
    ) -> Result<Arc<R>, DriverError> {
        match spec {
            ContextResourceSpec::Default => self.get_named(R::ID, R::ID),
            ContextResourceSpec::Reference(name) => {
                let matches_id = name
                    .strip_prefix(R::ID)
                    .is_some_and(|label| label.is_empty() || label.starts_with('#'));
                if !matches_id {
                    return Err(DriverError::invalid_argument(format!(
                        "invalid reference to {:?} resource: {name:?}",
                        R::ID
                    )));
                }
                self.get_named(name, name)
            }
            ContextResourceSpec::Inline(json) => Ok(Arc::new(R::from_json(json)?)),
        }
    }

    fn get_named<R: ContextResourceTraits>(
        &self,
        name: &str,
        requested: &str,
    ) -> Result<Arc<R>, DriverError> {
        let mut context = self;
        loop {
            if let Some(json) = context.0.spec.get(name) {
                return context.get_or_create(name, json);
            }
            match &context.0.parent {
                Some(parent) => context = parent,
                None if name == R::ID => return context.get_or_create(name, &Value::Null),
                None => {
                    return Err(DriverError::not_found(format!(
                        "resource not defined: {requested:?}"
                    )))
                }
            }
        }
    }

    fn get_or_create<R: ContextResourceTraits>(
        &self,
        name: &str,
        json: &Value,
    ) -> Result<Arc<R>, DriverError> {
        let mut resources = self.0.resources.lock();
        if let Some(resource) = resources.get(name) {
            return Arc::clone(resource)
                .downcast::<R>()
                .map_err(|_| DriverError::internal(format!("resource {name:?} has another type")));
        }
        let resource = Arc::new(
            R::from_json(json).map_err(|err| err.with_context(format!("creating {name:?}")))?,
        );
        resources.insert(name.to_string(), resource.clone());
        Ok(resource)
    }
}

/// A reference to a context resource that is either unbound or bound to a resource instance.
pub struct ContextResource<R> {
    spec: ContextResourceSpec,
    resource: Option<Arc<R>>,
}

impl<R> Clone for ContextResource<R> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            resource: self.resource.clone(),
        }
    }
}

impl<R> Default for ContextResource<R> {
    fn default() -> Self {
        Self {
            spec: ContextResourceSpec::Default,
            resource: None,
        }
    }
}

impl<R> std::fmt::Debug for ContextResource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextResource")
            .field("spec", &self.spec)
            .field("bound", &self.resource.is_some())
            .finish()
    }
}

impl<R: ContextResourceTraits> ContextResource<R> {
    /// Create an unbound resource reference.
    #[must_use]
    pub fn new(spec: ContextResourceSpec) -> Self {
        Self {
            spec,
            resource: None,
        }
    }

    /// Create a bound reference to `resource`.
    #[must_use]
    pub fn new_bound(spec: ContextResourceSpec, resource: Arc<R>) -> Self {
        Self {
            spec,
            resource: Some(resource),
        }
    }

    /// The reference.
    #[must_use]
    pub fn spec(&self) -> &ContextResourceSpec {
        &self.spec
    }

    /// Returns true if the reference is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.resource.is_some()
    }

    /// Resolve the reference against `context`. An already bound reference is returned unchanged.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the resource cannot be resolved.
    pub fn bind(&self, context: &Context) -> Result<Self, DriverError> {
        if self.resource.is_some() {
            return Ok(self.clone());
        }
        Ok(Self::new_bound(self.spec.clone(), context.get(&self.spec)?))
    }

    /// Drop the reference, reverting to the default resource.
    #[must_use]
    pub fn strip(&self) -> Self {
        Self::default()
    }

    /// The bound resource.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if the reference is not bound.
    pub fn get(&self) -> Result<&Arc<R>, DriverError> {
        self.resource.as_ref().ok_or_else(|| {
            DriverError::invalid_argument(format!("{:?} resource is not bound", R::ID))
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CachePoolConfiguration {
    total_bytes_limit: Option<u64>,
}

fn parse_configuration<T: Default + for<'de> Deserialize<'de>>(
    id: &str,
    json: &Value,
) -> Result<T, DriverError> {
    if json.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(json.clone()).map_err(|err| {
        DriverError::invalid_argument(format!("invalid {id:?} configuration {json}: {err}"))
    })
}

/// The `cache_pool` resource.
///
/// Holds the caches shared by drivers bound to the same pool: metadata caches, data caches, and a chunk cache bounded by `total_bytes_limit`.
pub struct CachePool {
    resource_id: u64,
    total_bytes_limit: u64,
    chunk_cache: ChunkCache,
    caches: parking_lot::Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for CachePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePool")
            .field("resource_id", &self.resource_id)
            .field("total_bytes_limit", &self.total_bytes_limit)
            .finish_non_exhaustive()
    }
}

impl CachePool {
    /// Create a new cache pool.
    #[must_use]
    pub fn new(total_bytes_limit: u64) -> Self {
        Self {
            resource_id: next_resource_id(),
            total_bytes_limit,
            chunk_cache: ChunkCache::new(total_bytes_limit),
            caches: parking_lot::Mutex::default(),
        }
    }

    /// The chunk cache capacity in bytes.
    #[must_use]
    pub fn total_bytes_limit(&self) -> u64 {
        self.total_bytes_limit
    }

    pub(crate) fn chunk_cache(&self) -> &ChunkCache {
        &self.chunk_cache
    }

    /// Return the cache stored at `key`, creating it with `make` if absent.
    ///
    /// # Errors
    /// Returns [`ErrorKind::Internal`](crate::ErrorKind::Internal) if a cache of another type is stored at `key`.
    pub fn get_or_insert_cache<C: Send + Sync + 'static>(
        &self,
        key: &str,
        make: impl FnOnce() -> C,
    ) -> Result<Arc<C>, DriverError> {
        let mut caches = self.caches.lock();
        let cache = caches
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(make()));
        Arc::clone(cache)
            .downcast::<C>()
            .map_err(|_| DriverError::internal(format!("cache {key:?} has another type")))
    }

    /// The number of metadata and data caches in the pool.
    #[must_use]
    pub fn num_caches(&self) -> usize {
        self.caches.lock().len()
    }
}

impl ContextResourceTraits for CachePool {
    const ID: &'static str = "cache_pool";

    fn from_json(json: &Value) -> Result<Self, DriverError> {
        let configuration: CachePoolConfiguration = parse_configuration(Self::ID, json)?;
        Ok(Self::new(configuration.total_bytes_limit.unwrap_or_else(|| {
            global_config().cache_pool_total_bytes_limit()
        })))
    }

    fn resource_id(&self) -> u64 {
        self.resource_id
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConcurrencyLimit {
    Shared(monostate::MustBe!("shared")),
    Limit(usize),
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DataCopyConcurrencyConfiguration {
    limit: Option<ConcurrencyLimit>,
}

/// The `data_copy_concurrency` resource.
///
/// Limits the number of chunks processed concurrently by a read or write, and runs open operations on an executor that is independent of the caller.
pub struct DataCopyConcurrency {
    resource_id: u64,
    limit: usize,
    executor: ThreadPool,
}

impl std::fmt::Debug for DataCopyConcurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCopyConcurrency")
            .field("resource_id", &self.resource_id)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl DataCopyConcurrency {
    /// Create a new data copy concurrency resource with a concurrent `limit`.
    ///
    /// # Errors
    /// Returns [`ErrorKind::Internal`](crate::ErrorKind::Internal) if the executor cannot be created.
    pub fn new(limit: usize) -> Result<Self, DriverError> {
        let limit = limit.max(1);
        let executor = ThreadPool::builder()
            .pool_size(limit)
            .name_prefix("chunkstore-")
            .create()
            .map_err(|err| DriverError::internal(format!("creating executor: {err}")))?;
        Ok(Self {
            resource_id: next_resource_id(),
            limit,
            executor,
        })
    }

    /// The concurrent limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> &ThreadPool {
        &self.executor
    }
}

impl ContextResourceTraits for DataCopyConcurrency {
    const ID: &'static str = "data_copy_concurrency";

    fn from_json(json: &Value) -> Result<Self, DriverError> {
        let configuration: DataCopyConcurrencyConfiguration = parse_configuration(Self::ID, json)?;
        let limit = match configuration.limit {
            Some(ConcurrencyLimit::Limit(limit)) => limit,
            Some(ConcurrencyLimit::Shared(_)) | None => global_config().data_copy_concurrency(),
        };
        Self::new(limit)
    }

    fn resource_id(&self) -> u64 {
        self.resource_id
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MemoryKeyValueStoreConfiguration {}

/// The `memory_key_value_store` resource: an in-memory store shared by every `memory` key-value store bound to it.
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    resource_id: u64,
    store: Arc<MemoryStore>,
}

impl MemoryKeyValueStore {
    /// Create a new empty in-memory store resource.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resource_id: next_resource_id(),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextResourceTraits for MemoryKeyValueStore {
    const ID: &'static str = "memory_key_value_store";

    fn from_json(json: &Value) -> Result<Self, DriverError> {
        let MemoryKeyValueStoreConfiguration {} = parse_configuration(Self::ID, json)?;
        Ok(Self::new())
    }

    fn resource_id(&self) -> u64 {
        self.resource_id
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn context_default_resources_are_shared() {
        let context = Context::default();
        let a: Arc<CachePool> = context.get(&ContextResourceSpec::Default).unwrap();
        let b: Arc<CachePool> = context
            .get(&ContextResourceSpec::Reference("cache_pool".to_string()))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let child = context.new_child(json!({})).unwrap();
        let c: Arc<CachePool> = child.get(&ContextResourceSpec::Default).unwrap();
        assert!(Arc::ptr_eq(&a, &c));

        let inline: Arc<CachePool> = context
            .get(&ContextResourceSpec::Inline(json!({"total_bytes_limit": 5})))
            .unwrap();
        assert_eq!(inline.total_bytes_limit(), 5);
        assert_ne!(inline.resource_id(), a.resource_id());
    }

    #[test]
    fn context_named_resources() {
        let context = Context::from_json(json!({
            "cache_pool#big": {"total_bytes_limit": 1000},
            "data_copy_concurrency": {"limit": 2}
        }))
        .unwrap();
        let big: Arc<CachePool> = context
            .get(&ContextResourceSpec::Reference("cache_pool#big".to_string()))
            .unwrap();
        assert_eq!(big.total_bytes_limit(), 1000);

        let concurrency: Arc<DataCopyConcurrency> =
            context.get(&ContextResourceSpec::Default).unwrap();
        assert_eq!(concurrency.limit(), 2);

        let missing = context
            .get::<CachePool>(&ContextResourceSpec::Reference("cache_pool#small".to_string()));
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        let wrong_kind = context
            .get::<CachePool>(&ContextResourceSpec::Reference("data_copy_concurrency".to_string()));
        assert_eq!(wrong_kind.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn context_invalid() {
        assert!(Context::from_json(json!([1])).is_err());
        assert!(Context::from_json(json!({"#a": {}})).is_err());
        let context = Context::from_json(json!({"cache_pool": {"limit": 1}})).unwrap();
        let error = context
            .get::<CachePool>(&ContextResourceSpec::Default)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn context_resource_bind_strip() {
        let context = Context::default();
        let resource = ContextResource::<MemoryKeyValueStore>::default();
        assert!(resource.get().is_err());
        let bound = resource.bind(&context).unwrap();
        assert!(bound.is_bound());
        let again = ContextResource::<MemoryKeyValueStore>::default()
            .bind(&context)
            .unwrap();
        assert!(Arc::ptr_eq(bound.get().unwrap(), again.get().unwrap()));
        assert!(!bound.strip().is_bound());
        assert_eq!(bound.strip().spec(), &ContextResourceSpec::Default);
    }

    #[test]
    fn data_copy_concurrency_shared() {
        let concurrency = DataCopyConcurrency::from_json(&json!({"limit": "shared"})).unwrap();
        assert!(concurrency.limit() >= 1);
        assert!(DataCopyConcurrency::from_json(&json!({"limit": "none"})).is_err());
    }
}
