//! Binding of a resource to a consumer.
//!
//! A [`ResourceBinding`] is what a view holds: on every evaluation it
//! derives the key from the current navigation context, reads the entry,
//! triggers a load when the entry is neither fresh nor loading, and hands
//! back a [`ResourceView`] whose actions are bound to that key.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use turbo_router::RouterContext;

use crate::definition::ResourceDefinition;
use crate::entry::ResourceSlice;
use crate::key::derive_key;
use crate::store::{FetchOptions, ResourceStore};
use crate::subscription::{Listener, Subscription};
use crate::{FetchError, ResourceError};

/// The store operations a binding forwards to.
pub trait ResourceActions: Clone + Send + Sync + 'static {
    /// Current time in epoch ms.
    fn now_ms(&self) -> u64;

    /// Record the definition's caching policy.
    fn register(&self, definition: &ResourceDefinition);

    /// Read (creating if needed) an entry.
    fn get_or_create(&self, resource_type: &str, key: &str) -> ResourceSlice;

    /// Trigger a load.
    fn get_resource_from_remote(
        &self,
        definition: &ResourceDefinition,
        ctx: &RouterContext,
        options: FetchOptions,
    ) -> Result<(), ResourceError>;

    /// Replace an entry's data locally.
    fn update<F>(&self, resource_type: &str, key: &str, updater: F)
    where
        F: FnOnce(Option<Value>) -> Option<Value>;

    /// Mark an entry stale.
    fn invalidate(&self, resource_type: &str, key: &str);

    /// Remove an entry.
    fn clear(&self, resource_type: &str, key: &str);

    /// Remove every entry of a type.
    fn clear_all(&self, resource_type: &str);

    /// Watch an entry.
    fn subscribe(&self, resource_type: &str, key: &str, listener: Listener) -> Subscription;
}

impl ResourceActions for ResourceStore {
    fn now_ms(&self) -> u64 {
        ResourceStore::now_ms(self)
    }

    fn register(&self, definition: &ResourceDefinition) {
        ResourceStore::register(self, definition)
    }

    fn get_or_create(&self, resource_type: &str, key: &str) -> ResourceSlice {
        ResourceStore::get_or_create(self, resource_type, key)
    }

    fn get_resource_from_remote(
        &self,
        definition: &ResourceDefinition,
        ctx: &RouterContext,
        options: FetchOptions,
    ) -> Result<(), ResourceError> {
        ResourceStore::get_resource_from_remote(self, definition, ctx, options)
    }

    fn update<F>(&self, resource_type: &str, key: &str, updater: F)
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        ResourceStore::update(self, resource_type, key, updater)
    }

    fn invalidate(&self, resource_type: &str, key: &str) {
        ResourceStore::invalidate(self, resource_type, key)
    }

    fn clear(&self, resource_type: &str, key: &str) {
        ResourceStore::clear(self, resource_type, key)
    }

    fn clear_all(&self, resource_type: &str) {
        ResourceStore::clear_all(self, resource_type)
    }

    fn subscribe(&self, resource_type: &str, key: &str, listener: Listener) -> Subscription {
        ResourceStore::subscribe(self, resource_type, key, move |slice: &ResourceSlice| {
            listener(slice)
        })
    }
}

/// Actions bound to one `(resource, key)` pair under one context.
///
/// Actions never follow a binding to a new key: a handle obtained before a
/// navigation keeps acting on the entry it was created for.
#[derive(Clone)]
pub struct BoundActions<S: ResourceActions = ResourceStore> {
    store: S,
    definition: ResourceDefinition,
    context: RouterContext,
    key: String,
}

impl<S: ResourceActions> BoundActions<S> {
    /// The key these actions act on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The context these actions were bound under.
    pub fn context(&self) -> &RouterContext {
        &self.context
    }

    /// Replace the data locally.
    pub fn update<F>(&self, updater: F)
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        self.store
            .update(self.definition.resource_type(), &self.key, updater);
    }

    /// Reload from the data source, regardless of freshness.
    pub fn refresh(&self) -> Result<(), ResourceError> {
        self.store
            .invalidate(self.definition.resource_type(), &self.key);
        self.store.get_resource_from_remote(
            &self.definition,
            &self.context,
            FetchOptions { prefetch: false },
        )
    }

    /// Remove this entry.
    pub fn clear(&self) {
        self.store.clear(self.definition.resource_type(), &self.key);
    }

    /// Remove every entry of this resource type.
    pub fn clear_all(&self) {
        self.store.clear_all(self.definition.resource_type());
    }
}

impl<S: ResourceActions> fmt::Debug for BoundActions<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundActions")
            .field("resource_type", &self.definition.resource_type())
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Result of evaluating a binding: the entry plus its bound actions.
#[derive(Debug, Clone)]
pub struct ResourceView<S: ResourceActions = ResourceStore> {
    /// Entry snapshot at evaluation time.
    pub slice: ResourceSlice,
    /// Actions bound to the entry.
    pub actions: BoundActions<S>,
}

impl<S: ResourceActions> ResourceView<S> {
    /// Cached data.
    pub fn data(&self) -> Option<&Value> {
        self.slice.data.as_ref()
    }

    /// Decode the cached data.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, ResourceError> {
        self.slice.data_as()
    }

    /// Error of the last failed load.
    pub fn error(&self) -> Option<&FetchError> {
        self.slice.error.as_ref()
    }

    /// Whether a load is in flight.
    pub fn loading(&self) -> bool {
        self.slice.loading
    }

    /// The entry's key.
    pub fn key(&self) -> &str {
        &self.slice.key
    }
}

/// A consumer's subscription to one resource.
pub struct ResourceBinding<S: ResourceActions = ResourceStore> {
    store: S,
    definition: ResourceDefinition,
    on_change: Option<Listener>,
    current_key: Option<String>,
    subscription: Option<Subscription>,
}

impl<S: ResourceActions> ResourceBinding<S> {
    /// Bind `definition` against `store`.
    pub fn new(store: &S, definition: ResourceDefinition) -> Self {
        store.register(&definition);
        Self {
            store: store.clone(),
            definition,
            on_change: None,
            current_key: None,
            subscription: None,
        }
    }

    /// Call `f` whenever the bound entry changes.
    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceSlice) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(f));
        self
    }

    /// The bound definition.
    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// Key of the last evaluation.
    pub fn current_key(&self) -> Option<&str> {
        self.current_key.as_deref()
    }

    /// Evaluate against the current navigation context.
    pub fn evaluate(&mut self, ctx: &RouterContext) -> Result<ResourceView<S>, ResourceError> {
        let key = derive_key(&self.definition, ctx)?;
        let resource_type = self.definition.resource_type();

        if self.current_key.as_deref() != Some(key.as_str()) {
            debug!(
                resource_type,
                key = %key,
                previous = ?self.current_key,
                "binding to key"
            );
            self.subscription = None;
            if let Some(listener) = &self.on_change {
                self.subscription =
                    Some(self.store.subscribe(resource_type, &key, Arc::clone(listener)));
            }
            self.current_key = Some(key.clone());
        }

        let mut slice = self.store.get_or_create(resource_type, &key);
        if !slice.loading && !slice.is_fresh(self.store.now_ms()) {
            self.store
                .get_resource_from_remote(&self.definition, ctx, FetchOptions::default())?;
            slice = self.store.get_or_create(resource_type, &key);
        }

        Ok(ResourceView {
            slice,
            actions: BoundActions {
                store: self.store.clone(),
                definition: self.definition.clone(),
                context: ctx.clone(),
                key,
            },
        })
    }
}

impl<S: ResourceActions> fmt::Debug for ResourceBinding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBinding")
            .field("definition", &self.definition)
            .field("current_key", &self.current_key)
            .finish_non_exhaustive()
    }
}
