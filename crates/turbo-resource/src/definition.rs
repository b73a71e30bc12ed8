//! Resource definitions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use turbo_router::RouterContext;

use crate::config::duration_ms;
use crate::key::ResourceKeyBuilder;
use crate::{FetchError, ResourceError};

/// Future returned by a resource's data loader.
pub type DataFuture = BoxFuture<'static, Result<Value, FetchError>>;

pub(crate) type KeyFn = Arc<dyn Fn(&RouterContext) -> Result<String, ResourceError> + Send + Sync>;
pub(crate) type DataFn = Arc<dyn Fn(&RouterContext, &ResourceExtra) -> DataFuture + Send + Sync>;

/// Extra information passed to a data loader alongside the context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceExtra {
    /// The load was requested as a prefetch rather than by a consumer.
    pub is_prefetch: bool,
}

/// An immutable description of a named async data source and its caching
/// policy.
///
/// Two definitions are equal when they share a `type`; the type is the
/// resource's identity in the store.
///
/// ```rust
/// use std::time::Duration;
/// use turbo_resource::{FetchError, ResourceDefinition};
///
/// let products = ResourceDefinition::builder("product")
///     .get_key(|ctx| Ok(ctx.param("id").unwrap_or_default().to_string()))
///     .get_data(|ctx, _extra| {
///         let id = ctx.param("id").unwrap_or_default().to_string();
///         async move { Ok::<_, FetchError>(format!("product {}", id)) }
///     })
///     .max_age(Duration::from_secs(60))
///     .build()
///     .unwrap();
///
/// assert_eq!(products.resource_type(), "product");
/// ```
#[derive(Clone)]
pub struct ResourceDefinition {
    resource_type: String,
    pub(crate) get_key: KeyFn,
    get_data: DataFn,
    max_age: Duration,
}

impl ResourceDefinition {
    /// Start building a definition for `resource_type`.
    pub fn builder(resource_type: impl Into<String>) -> ResourceDefinitionBuilder {
        ResourceDefinitionBuilder::new(resource_type)
    }

    /// The resource type (unique id).
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// How long a successful load stays fresh.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub(crate) fn max_age_ms(&self) -> u64 {
        duration_ms(self.max_age)
    }

    /// Start the data loader.
    pub(crate) fn load(&self, ctx: &RouterContext, extra: &ResourceExtra) -> DataFuture {
        (self.get_data)(ctx, extra)
    }
}

impl PartialEq for ResourceDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type
    }
}

impl Eq for ResourceDefinition {}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("resource_type", &self.resource_type)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResourceDefinition`].
pub struct ResourceDefinitionBuilder {
    resource_type: String,
    get_key: Option<KeyFn>,
    get_data: Option<DataFn>,
    max_age: Duration,
}

impl ResourceDefinitionBuilder {
    /// Create a builder for `resource_type`.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            get_key: None,
            get_data: None,
            max_age: Duration::ZERO,
        }
    }

    /// Set the key function.
    pub fn get_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&RouterContext) -> Result<String, ResourceError> + Send + Sync + 'static,
    {
        self.get_key = Some(Arc::new(f));
        self
    }

    /// Derive keys declaratively with a [`ResourceKeyBuilder`].
    pub fn key_builder(mut self, builder: ResourceKeyBuilder) -> Self {
        let resource_type = self.resource_type.clone();
        self.get_key = Some(Arc::new(move |ctx: &RouterContext| {
            builder.build(&resource_type, ctx)
        }));
        self
    }

    /// Set the data loader. Its output is stored as JSON.
    pub fn get_data<F, Fut, T>(mut self, f: F) -> Self
    where
        F: Fn(&RouterContext, &ResourceExtra) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
        T: Serialize,
    {
        self.get_data = Some(Arc::new(move |ctx: &RouterContext, extra: &ResourceExtra| {
            let fut = f(ctx, extra);
            async move {
                let value = fut.await?;
                Ok(serde_json::to_value(value)?)
            }
            .boxed()
        }));
        self
    }

    /// Set how long a successful load stays fresh (default zero).
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Validate and build the definition.
    pub fn build(self) -> Result<ResourceDefinition, ResourceError> {
        if self.resource_type.trim().is_empty() {
            return Err(ResourceError::InvalidDefinition(
                "resource type must not be empty".to_string(),
            ));
        }

        let get_key = self.get_key.ok_or_else(|| {
            ResourceError::InvalidDefinition(format!("resource '{}' has no getKey", self.resource_type))
        })?;

        let get_data = self.get_data.ok_or_else(|| {
            ResourceError::InvalidDefinition(format!("resource '{}' has no getData", self.resource_type))
        })?;

        Ok(ResourceDefinition {
            resource_type: self.resource_type,
            get_key,
            get_data,
            max_age: self.max_age,
        })
    }
}
