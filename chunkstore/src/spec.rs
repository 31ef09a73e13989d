//! Driver specifications and the driver registry.
//!
//! A [`Spec`] is an immutable, JSON-representable description of how to open an array.
//! The `driver` member of its JSON form selects a driver plugin registered with [`inventory::submit`] as a [`DriverPlugin`] or at runtime with [`register_driver`]:
//! ```json
//! {
//!     "driver": "zarr",
//!     "kvstore": {"driver": "memory"},
//!     "path": "a/",
//!     "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4"},
//!     "create": true
//! }
//! ```
//!
//! A specification is either unbound (its context resource references are unresolved) or bound ([`Spec::bind_context`]).
//! Binding returns a new specification; the original is unchanged.

use std::sync::Arc;

use chunkstore_plugin::{Plugin, PluginCreateError, PluginIdentifier, Registry};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

use crate::cache_key::CacheKeyEncoder;
use crate::context::Context;
use crate::driver::{Driver, ReadWriteMode};
use crate::schema::Schema;
use crate::DriverError;

/// How an open treats existing and missing arrays.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpenMode {
    /// Open an existing array.
    pub open: bool,
    /// Create the array if it does not exist.
    pub create: bool,
    /// Delete an existing array before creating. Requires `create` and excludes `open`.
    pub delete_existing: bool,
}

impl Default for OpenMode {
    fn default() -> Self {
        Self::OPEN
    }
}

impl OpenMode {
    /// Open an existing array.
    pub const OPEN: Self = Self {
        open: true,
        create: false,
        delete_existing: false,
    };
    /// Create a new array.
    pub const CREATE: Self = Self {
        open: false,
        create: true,
        delete_existing: false,
    };
    /// Open an existing array or create it if it does not exist.
    pub const OPEN_OR_CREATE: Self = Self {
        open: true,
        create: true,
        delete_existing: false,
    };
    /// Delete any existing array and create a new one.
    pub const DELETE_EXISTING: Self = Self {
        open: false,
        create: true,
        delete_existing: true,
    };

    /// Check the mode for consistency.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if neither `open` nor `create` is set, or `delete_existing` is set with `open` or without `create`.
    pub fn validate(&self) -> Result<(), DriverError> {
        if !self.open && !self.create {
            return Err(DriverError::invalid_argument(
                "at least one of \"open\" or \"create\" must be specified",
            ));
        }
        if self.delete_existing && (self.open || !self.create) {
            return Err(DriverError::invalid_argument(
                "\"delete_existing\" requires \"create\" and is incompatible with \"open\"",
            ));
        }
        Ok(())
    }
}

/// Options applied to a specification with [`Spec::apply_options`].
#[derive(Clone, Debug, Default)]
pub struct SpecOptions {
    /// Discard format metadata constraints that were inferred rather than explicitly specified.
    pub minimal_spec: bool,
    /// Additional schema constraints.
    pub schema: Schema,
    /// The open mode, overriding the specification.
    pub open_mode: Option<OpenMode>,
    /// The read/write mode, overriding the specification.
    pub read_write_mode: Option<ReadWriteMode>,
    /// Re-read metadata that is already cached.
    pub recheck_cached_metadata: Option<bool>,
}

/// Traits for the driver-specific implementation of a [`Spec`].
pub trait DriverSpecTraits: std::fmt::Debug + Send + Sync {
    /// The driver identifier.
    fn driver_id(&self) -> &'static str;

    /// The JSON form, including the `driver` member.
    fn to_json(&self) -> Value;

    /// Resolve context resources.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if a resource cannot be resolved.
    fn bind_context(&self, context: &Context) -> Result<Arc<dyn DriverSpecTraits>, DriverError>;

    /// Drop context resource references.
    fn strip_context(&self) -> Arc<dyn DriverSpecTraits>;

    /// Apply options.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if an option conflicts with the specification.
    fn apply_options(&self, options: &SpecOptions)
        -> Result<Arc<dyn DriverSpecTraits>, DriverError>;

    /// Encode the members that identify the opened data. Requires a bound specification.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification is not bound.
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) -> Result<(), DriverError>;

    /// The schema constraints.
    fn schema(&self) -> &Schema;

    /// The open mode.
    fn open_mode(&self) -> OpenMode;

    /// Open a bound specification.
    ///
    /// The open proceeds independently of the returned future: dropping the future discards the result but does not cancel the open.
    fn open(self: Arc<Self>) -> BoxFuture<'static, Result<Driver, DriverError>>;
}

/// A driver plugin. Creates a specification from the JSON members other than `driver`.
pub struct DriverPlugin(Plugin<Arc<dyn DriverSpecTraits>, Map<String, Value>>);
inventory::collect!(DriverPlugin);

impl DriverPlugin {
    /// Create a new driver plugin.
    pub const fn new(
        identifier: &'static str,
        create_fn: fn(&Map<String, Value>) -> Result<Arc<dyn DriverSpecTraits>, PluginCreateError>,
    ) -> Self {
        Self(Plugin::new(identifier, create_fn))
    }
}

impl PluginIdentifier for DriverPlugin {
    fn identifier(&self) -> &'static str {
        self.0.identifier()
    }
}

static DRIVERS: Registry<DriverPlugin> = Registry::new("driver");

/// Register a driver at runtime.
///
/// # Panics
/// Panics if a driver with the same identifier is already registered.
pub fn register_driver(plugin: DriverPlugin) {
    DRIVERS.register(plugin);
}

/// The identifiers of the registered drivers.
#[must_use]
pub fn driver_identifiers() -> Vec<&'static str> {
    DRIVERS.identifiers()
}

/// A driver specification.
#[derive(Clone, Debug)]
pub struct Spec(Arc<dyn DriverSpecTraits>);

impl Spec {
    /// Wrap a driver-specific specification.
    #[must_use]
    pub fn new(spec: Arc<dyn DriverSpecTraits>) -> Self {
        Self(spec)
    }

    /// Parse a specification from JSON.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if `driver` is missing or not registered, or a member is invalid.
    pub fn from_json(json: &Value) -> Result<Self, DriverError> {
        let Value::Object(members) = json else {
            return Err(DriverError::invalid_argument(format!(
                "specification must be a JSON object, got {json}"
            )));
        };
        let mut members = members.clone();
        let driver = match members.remove("driver") {
            Some(Value::String(driver)) => driver,
            Some(driver) => {
                return Err(DriverError::invalid_argument(format!(
                    "invalid \"driver\": {driver}"
                )))
            }
            None => return Err(DriverError::invalid_argument("\"driver\" must be specified")),
        };
        let plugin = DRIVERS.get(&driver).ok_or_else(|| {
            DriverError::invalid_argument(format!("unsupported driver {driver:?}"))
        })?;
        let spec = plugin.0.create(&members).map_err(|err| {
            DriverError::invalid_argument(format!("invalid {driver:?} specification: {err}"))
        })?;
        Ok(Self(spec))
    }

    /// The JSON form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        self.0.to_json()
    }

    /// The driver identifier.
    #[must_use]
    pub fn driver_id(&self) -> &'static str {
        self.0.driver_id()
    }

    /// The schema constraints.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.0.schema()
    }

    /// The open mode.
    #[must_use]
    pub fn open_mode(&self) -> OpenMode {
        self.0.open_mode()
    }

    /// Resolve context resource references against `context`, returning a bound specification.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) if a named resource is not defined, or [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if a resource configuration is invalid.
    pub fn bind_context(&self, context: &Context) -> Result<Self, DriverError> {
        Ok(Self(self.0.bind_context(context)?))
    }

    /// Drop context resource references, e.g. before serialization.
    #[must_use]
    pub fn strip_context(&self) -> Self {
        Self(self.0.strip_context())
    }

    /// Apply options. Applying the same options twice has the same effect as applying them once.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument) if an option conflicts with the specification.
    pub fn apply_options(&self, options: &SpecOptions) -> Result<Self, DriverError> {
        Ok(Self(self.0.apply_options(options)?))
    }

    /// The cache key of a bound specification.
    ///
    /// Specifications that would observe the same stored chunks have equal keys.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the specification is not bound.
    pub fn cache_key(&self) -> Result<String, DriverError> {
        let mut encoder = CacheKeyEncoder::new();
        encoder.encode(self.0.driver_id());
        self.0.encode_cache_key(&mut encoder)?;
        Ok(encoder.finish())
    }

    /// Bind the specification to `context` and open it.
    ///
    /// Binding happens before this function returns.
    /// The open then proceeds on the executor of the `data_copy_concurrency` resource: dropping the returned future discards the result but does not cancel the open.
    pub fn open(&self, context: &Context) -> BoxFuture<'static, Result<Driver, DriverError>> {
        match self.0.bind_context(context) {
            Ok(bound) => bound.open(),
            Err(err) => futures::future::ready(Err(err)).boxed(),
        }
    }
}

/// Parse, apply `options` to, bind, and open a specification.
///
/// See [`Spec::open`].
pub fn open(
    json: &Value,
    context: &Context,
    options: &SpecOptions,
) -> BoxFuture<'static, Result<Driver, DriverError>> {
    match Spec::from_json(json).and_then(|spec| spec.apply_options(options)) {
        Ok(spec) => spec.open(context),
        Err(err) => futures::future::ready(Err(err)).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn open_mode_validate() {
        assert!(OpenMode::OPEN.validate().is_ok());
        assert!(OpenMode::CREATE.validate().is_ok());
        assert!(OpenMode::OPEN_OR_CREATE.validate().is_ok());
        assert!(OpenMode::DELETE_EXISTING.validate().is_ok());
        let invalid = OpenMode {
            open: true,
            create: true,
            delete_existing: true,
        };
        assert!(invalid.validate().is_err());
        let invalid = OpenMode {
            open: false,
            create: false,
            delete_existing: false,
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn spec_from_json_invalid_driver() {
        for json in [
            json!({"path": "a"}),
            json!({"driver": 1}),
            json!({"driver": "n5"}),
            json!("zarr"),
        ] {
            let error = Spec::from_json(&json).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument, "{json}");
        }
    }

    #[test]
    fn driver_registered() {
        assert!(driver_identifiers().contains(&"zarr"));
    }
}
