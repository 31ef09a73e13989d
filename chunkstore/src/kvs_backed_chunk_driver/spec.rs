use std::sync::Arc;

use chunkstore_data_type::DataType;
use chunkstore_storage::{StoreKey, StorePrefix};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::data_cache::KvsDataCache;
use super::driver::KvsDriver;
use super::{DataCacheFormat, KvsBackedFormat};
use crate::cache_key::CacheKeyEncoder;
use crate::context::{
    CachePool, Context, ContextResource, ContextResourceSpec, ContextResourceTraits,
    DataCopyConcurrency,
};
use crate::driver::{Driver, ReadWriteMode};
use crate::kvstore::KvStoreSpec;
use crate::metadata_cache::MetadataCache;
use crate::schema::Schema;
use crate::spec::{DriverSpecTraits, OpenMode, SpecOptions};
use crate::DriverError;

/// The specification of an array of format `F` stored in a key-value store.
///
/// JSON members common to every format:
/// - `kvstore`: the key-value store (default: `{"driver": "memory"}`),
/// - `path`: the path of the array within the store,
/// - `context`: context resources defined for this array only,
/// - `cache_pool`, `data_copy_concurrency`: context resource references,
/// - `open`, `create`, `delete_existing`: the [`OpenMode`],
/// - `recheck_cached_metadata`: re-read cached metadata on open (metadata cached as absent is always re-read),
/// - `schema`, `dtype`, `rank`: [`Schema`] constraints.
#[derive(Clone, Debug)]
pub struct KvsSpec<F: KvsBackedFormat> {
    kvstore: KvStoreSpec,
    path: String,
    context: Option<Value>,
    cache_pool: ContextResource<CachePool>,
    data_copy_concurrency: ContextResource<DataCopyConcurrency>,
    open_mode: OpenMode,
    read_write_mode: ReadWriteMode,
    recheck_cached_metadata: bool,
    schema: Schema,
    data: F::SpecData,
}

pub(crate) fn take_member<T: DeserializeOwned>(
    members: &mut Map<String, Value>,
    name: &str,
) -> Result<Option<T>, DriverError> {
    members
        .remove(name)
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|err| {
                DriverError::invalid_argument(format!("invalid {name:?} {value}: {err}"))
            })
        })
        .transpose()
}

fn take_resource(members: &mut Map<String, Value>, name: &str) -> ContextResourceSpec {
    members
        .remove(name)
        .map_or(ContextResourceSpec::Default, |value| {
            ContextResourceSpec::from_json(&value)
        })
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

impl<F: KvsBackedFormat> KvsSpec<F> {
    /// Parse a specification from its JSON members, excluding `driver`.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if a member is invalid or unknown.
    pub fn from_json(members: &Map<String, Value>) -> Result<Self, DriverError> {
        let mut members = members.clone();
        let kvstore = match members.remove("kvstore") {
            Some(kvstore) => KvStoreSpec::from_json(&kvstore)?,
            None => KvStoreSpec::from_json(&serde_json::json!({"driver": "memory"}))?,
        };
        let path: String = take_member(&mut members, "path")?.unwrap_or_default();
        let context = match members.remove("context") {
            Some(context @ Value::Object(_)) => Some(context),
            Some(context) => {
                return Err(DriverError::invalid_argument(format!(
                    "\"context\" must be an object, got {context}"
                )))
            }
            None => None,
        };
        let cache_pool = ContextResource::new(take_resource(&mut members, CachePool::ID));
        let data_copy_concurrency =
            ContextResource::new(take_resource(&mut members, DataCopyConcurrency::ID));

        let open: Option<bool> = take_member(&mut members, "open")?;
        let create: Option<bool> = take_member(&mut members, "create")?;
        let delete_existing: Option<bool> = take_member(&mut members, "delete_existing")?;
        let open_mode = if open.is_none() && create.is_none() && delete_existing.is_none() {
            OpenMode::default()
        } else {
            OpenMode {
                open: open.unwrap_or_default(),
                create: create.unwrap_or_default(),
                delete_existing: delete_existing.unwrap_or_default(),
            }
        };
        open_mode.validate()?;
        let recheck_cached_metadata: bool =
            take_member(&mut members, "recheck_cached_metadata")?.unwrap_or_default();

        let mut schema = match members.remove("schema") {
            Some(schema) => Schema::from_json(&schema)?,
            None => Schema::default(),
        };
        if let Some(dtype) = take_member::<DataType>(&mut members, "dtype")? {
            schema.set_dtype(dtype)?;
        }
        if let Some(rank) = take_member::<usize>(&mut members, "rank")? {
            schema.set_rank(rank)?;
        }

        let mut data = F::spec_data_from_json(&mut members)?;
        if let Some(name) = members.keys().next() {
            return Err(DriverError::invalid_argument(format!(
                "unknown member {name:?}"
            )));
        }
        F::apply_options(&mut data, &schema, false)?;

        Ok(Self {
            kvstore,
            path,
            context,
            cache_pool,
            data_copy_concurrency,
            open_mode,
            read_write_mode: ReadWriteMode::default(),
            recheck_cached_metadata,
            schema,
            data,
        })
    }

    /// The format-specific members.
    #[must_use]
    pub fn data(&self) -> &F::SpecData {
        &self.data
    }

    /// The read/write mode of opened drivers.
    #[must_use]
    pub fn read_write_mode(&self) -> ReadWriteMode {
        self.read_write_mode
    }

    /// The key prefix of the array: the kvstore path joined with the path, ending with `/` unless empty.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        normalize_path(&self.kvstore.join_path(&self.path))
    }

    /// A copy reproducing a driver opened from this specification.
    pub(super) fn bound(
        &self,
        data: F::SpecData,
        read_write_mode: ReadWriteMode,
    ) -> Self {
        Self {
            data,
            open_mode: OpenMode::OPEN,
            read_write_mode,
            ..self.clone()
        }
    }

    fn metadata_cache_key(&self) -> Result<String, DriverError> {
        let mut encoder = CacheKeyEncoder::new();
        encoder
            .encode("metadata")
            .encode(F::ID)
            .encode(&self.kvstore.cache_key()?);
        Ok(encoder.finish())
    }

    fn data_cache_key(&self, key_prefix: &str, metadata: &F::Metadata) -> Result<String, DriverError> {
        let mut encoder = CacheKeyEncoder::new();
        encoder
            .encode("data")
            .encode(F::ID)
            .encode(&self.kvstore.cache_key()?);
        F::encode_data_cache_key(&self.data, key_prefix, metadata, &mut encoder);
        Ok(encoder.finish())
    }
}

impl<F: KvsBackedFormat> DriverSpecTraits for KvsSpec<F> {
    fn driver_id(&self) -> &'static str {
        F::ID
    }

    fn to_json(&self) -> Value {
        let mut json = Map::new();
        json.insert("driver".to_string(), F::ID.into());
        json.insert("kvstore".to_string(), self.kvstore.to_json());
        if !self.path.is_empty() {
            json.insert("path".to_string(), self.path.clone().into());
        }
        if let Some(context) = &self.context {
            json.insert("context".to_string(), context.clone());
        }
        if let Some(cache_pool) = self.cache_pool.spec().to_json() {
            json.insert(CachePool::ID.to_string(), cache_pool);
        }
        if let Some(concurrency) = self.data_copy_concurrency.spec().to_json() {
            json.insert(DataCopyConcurrency::ID.to_string(), concurrency);
        }
        if self.open_mode.open {
            json.insert("open".to_string(), true.into());
        }
        if self.open_mode.create {
            json.insert("create".to_string(), true.into());
        }
        if self.open_mode.delete_existing {
            json.insert("delete_existing".to_string(), true.into());
        }
        if self.recheck_cached_metadata {
            json.insert("recheck_cached_metadata".to_string(), true.into());
        }
        if !self.schema.is_empty() {
            json.insert("schema".to_string(), self.schema.to_json());
        }
        F::spec_data_to_json(&self.data, &mut json);
        Value::Object(json)
    }

    fn bind_context(&self, context: &Context) -> Result<Arc<dyn DriverSpecTraits>, DriverError> {
        let context = match &self.context {
            Some(json) => context.new_child(json.clone())?,
            None => context.clone(),
        };
        Ok(Arc::new(Self {
            kvstore: self.kvstore.bind_context(&context)?,
            context: None,
            cache_pool: self.cache_pool.bind(&context)?,
            data_copy_concurrency: self.data_copy_concurrency.bind(&context)?,
            ..self.clone()
        }))
    }

    fn strip_context(&self) -> Arc<dyn DriverSpecTraits> {
        Arc::new(Self {
            kvstore: self.kvstore.strip_context(),
            context: None,
            cache_pool: self.cache_pool.strip(),
            data_copy_concurrency: self.data_copy_concurrency.strip(),
            ..self.clone()
        })
    }

    fn apply_options(
        &self,
        options: &SpecOptions,
    ) -> Result<Arc<dyn DriverSpecTraits>, DriverError> {
        let mut spec = self.clone();
        if let Some(open_mode) = options.open_mode {
            open_mode.validate()?;
            spec.open_mode = open_mode;
        }
        if let Some(read_write_mode) = options.read_write_mode {
            if !read_write_mode.read && !read_write_mode.write {
                return Err(DriverError::invalid_argument(
                    "at least one of read or write must be permitted",
                ));
            }
            spec.read_write_mode = read_write_mode;
        }
        if let Some(recheck) = options.recheck_cached_metadata {
            spec.recheck_cached_metadata = recheck;
        }
        spec.schema.merge(&options.schema)?;
        F::apply_options(&mut spec.data, &spec.schema, options.minimal_spec)?;
        Ok(Arc::new(spec))
    }

    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) -> Result<(), DriverError> {
        encoder
            .encode(&self.kvstore.cache_key()?)
            .encode(&self.key_prefix())
            .encode(&self.cache_pool.get()?.resource_id())
            .encode(&self.data_copy_concurrency.get()?.resource_id());
        F::encode_spec_cache_key(&self.data, encoder);
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open_mode(&self) -> OpenMode {
        self.open_mode
    }

    fn open(self: Arc<Self>) -> BoxFuture<'static, Result<Driver, DriverError>> {
        let executor = match self.data_copy_concurrency.get() {
            Ok(concurrency) => concurrency.executor().clone(),
            Err(err) => return futures::future::ready(Err(err)).boxed(),
        };
        let (sender, receiver) = futures::channel::oneshot::channel();
        executor.spawn_ok(async move {
            let result = open_driver(self).await;
            if let Err(err) = &result {
                log::debug!("{}: open failed: {err}", F::ID);
            }
            // The receiver is gone if the caller abandoned the open.
            let _ = sender.send(result);
        });
        async move {
            receiver
                .await
                .map_err(|_| DriverError::internal("the open was dropped before completion"))?
        }
        .boxed()
    }
}

fn validate_schema<F: KvsBackedFormat>(
    schema: &Schema,
    data_cache: &KvsDataCache<F>,
    metadata: &F::Metadata,
    component_index: usize,
) -> Result<(), DriverError> {
    let format = data_cache.format();
    let component = &format.chunk_grid_specification().components()[component_index];
    let mismatch = |member: &str, expected: &dyn std::fmt::Debug, actual: &dyn std::fmt::Debug| {
        DriverError::invalid_argument(format!(
            "schema {member} {expected:?} does not match {actual:?}"
        ))
    };
    if let Some(dtype) = schema.dtype() {
        if dtype != component.data_type() {
            return Err(mismatch("dtype", &dtype, &component.data_type()));
        }
    }
    if let Some(rank) = schema.rank() {
        if rank != component.rank() {
            return Err(mismatch("rank", &rank, &component.rank()));
        }
    }
    if let Some(shape) = schema.shape() {
        let mut domain = format.chunk_grid_bounds(metadata).shape;
        domain.extend(component.unchunked_shape());
        if shape != domain.as_slice() {
            return Err(mismatch("shape", &shape, &domain));
        }
    }
    if let Some(chunk_shape) = schema.chunk_shape() {
        if chunk_shape != component.cell_shape() {
            return Err(mismatch("chunk_shape", &chunk_shape, &component.cell_shape()));
        }
    }
    F::validate_schema(schema, metadata, component_index)
}

async fn open_driver<F: KvsBackedFormat>(spec: Arc<KvsSpec<F>>) -> Result<Driver, DriverError> {
    let store = spec.kvstore.open()?;
    let cache_pool = spec.cache_pool.get()?.clone();
    let concurrency = spec.data_copy_concurrency.get()?.clone();
    let key_prefix = spec.key_prefix();
    let metadata_key = StoreKey::new(F::metadata_key(&key_prefix))
        .map_err(|err| DriverError::invalid_argument(format!("invalid path: {err}")))?;

    log::debug!("{}: fetching metadata {metadata_key}", F::ID);
    let metadata_cache = cache_pool.get_or_insert_cache(&spec.metadata_cache_key()?, || {
        MetadataCache::<F>::new(store.clone())
    })?;
    if spec.open_mode.delete_existing {
        let prefix = StorePrefix::new(key_prefix.clone())
            .map_err(|err| DriverError::invalid_argument(format!("invalid path: {err}")))?;
        log::debug!("{}: deleting existing keys under {prefix:?}", F::ID);
        store
            .erase_prefix(&prefix)
            .await
            .map_err(|err| DriverError::storage("erasing", prefix.as_str(), err))?;
        cache_pool.chunk_cache().invalidate_all();
    }
    let (entry, fresh) = metadata_cache.entry(&metadata_key).await?;
    // Cached absence is always rechecked; the metadata may have been created since.
    let recheck = spec.recheck_cached_metadata || entry.metadata().is_none();
    if spec.open_mode.delete_existing || (!fresh && recheck) {
        entry.refresh().await?;
    }

    let metadata = if spec.open_mode.create {
        log::debug!("{}: creating metadata {metadata_key} if absent", F::ID);
        entry
            .get_or_create(
                || F::create_metadata(&spec.data, &spec.schema),
                !spec.open_mode.open,
            )
            .await?
    } else {
        entry.metadata().ok_or_else(|| {
            DriverError::not_found(format!("metadata {metadata_key} does not exist"))
        })?
    };

    log::debug!("{}: validating metadata {metadata_key}", F::ID);
    F::validate_metadata(&spec.data, &metadata)?;

    log::debug!("{}: resolving component", F::ID);
    let component_index = F::component_index(&spec.data, &metadata)?;
    let data_cache_key = spec.data_cache_key(&key_prefix, &metadata)?;
    let format = F::make_data_cache(&spec.data, &key_prefix, &metadata)?;
    let data_cache = cache_pool.get_or_insert_cache(&data_cache_key, || {
        KvsDataCache::<F>::new(format, store, data_cache_key.as_str().into(), &cache_pool)
    })?;
    validate_schema(&spec.schema, &data_cache, &metadata, component_index)?;

    log::debug!("{}: ready {metadata_key}", F::ID);
    let read_write_mode = spec.read_write_mode;
    Ok(Arc::new(KvsDriver::<F>::new(
        spec,
        entry,
        metadata,
        data_cache,
        component_index,
        read_write_mode,
        concurrency.limit(),
    )))
}
