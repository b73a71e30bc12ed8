//! The resource store: owner of every cache entry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::channel::oneshot;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use turbo_router::RouterContext;

use crate::clock::{Clock, SystemClock};
use crate::definition::{DataFuture, ResourceDefinition, ResourceExtra};
use crate::entry::{ResourceEntry, ResourceSlice};
use crate::hydration::{EntrySlice, HydrationSnapshot, ResourceData};
use crate::key::derive_key;
use crate::spawn::{InFlight, Task, TaskSpawner};
use crate::stats::{StatsCollector, StoreStats};
use crate::subscription::{Listener, Listeners, Subscription};
use crate::{FetchError, ResourceError, StoreConfig};

/// Options for [`ResourceStore::get_resource_from_remote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Load even when the entry is fresh (warm-up ahead of navigation).
    pub prefetch: bool,
}

impl FetchOptions {
    /// Options for a prefetch.
    pub fn prefetch() -> Self {
        Self { prefetch: true }
    }
}

/// Read-only copy of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Entries by type, then key.
    pub data: BTreeMap<String, BTreeMap<String, ResourceSlice>>,
}

impl StoreSnapshot {
    /// Look up one entry.
    pub fn get(&self, resource_type: &str, key: &str) -> Option<&ResourceSlice> {
        self.data.get(resource_type).and_then(|entries| entries.get(key))
    }
}

#[derive(Default)]
struct StoreState {
    data: BTreeMap<String, BTreeMap<String, ResourceEntry>>,
    max_ages: HashMap<String, u64>,
    hydrated_context: Option<RouterContext>,
    next_generation: u64,
}

impl StoreState {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn entry(&self, resource_type: &str, key: &str) -> Option<&ResourceEntry> {
        self.data.get(resource_type).and_then(|entries| entries.get(key))
    }

    fn entry_mut(&mut self, resource_type: &str, key: &str) -> Option<&mut ResourceEntry> {
        self.data
            .get_mut(resource_type)
            .and_then(|entries| entries.get_mut(key))
    }

    fn get_or_create(&mut self, resource_type: &str, key: &str) -> &mut ResourceEntry {
        let next_generation = &mut self.next_generation;
        self.data
            .entry(resource_type.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| {
                *next_generation += 1;
                ResourceEntry::new(key, *next_generation)
            })
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    listeners: Listeners,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn TaskSpawner>,
    config: StoreConfig,
    stats: StatsCollector,
}

impl StoreInner {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keyed resource cache with single-flight loading.
///
/// Entries live under `(type, key)`. All mutation goes through the store's
/// actions, which are serialized by one lock that is never held across user
/// code other than an `update` updater, nor across an await point.
/// Listeners run after the lock is released.
///
/// The store is a cheap handle; clones share the same cache.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use turbo_resource::{FetchError, FetchOptions, ResourceDefinition, ResourceStore};
/// use turbo_router::RouterContext;
///
/// # async fn run() -> Result<(), turbo_resource::ResourceError> {
/// let store = ResourceStore::new();
/// let user = ResourceDefinition::builder("user")
///     .get_key(|_| Ok("me".to_string()))
///     .get_data(|_, _| async { Ok::<_, FetchError>("Ada") })
///     .max_age(Duration::from_secs(30))
///     .build()?;
///
/// let ctx = RouterContext::default();
/// store.get_resource_from_remote(&user, &ctx, FetchOptions::default())?;
/// if let Some(pending) = store.pending("user", "me") {
///     pending.await;
/// }
/// assert_eq!(store.get_or_create("user", "me").data_as::<String>()?, Some("Ada".into()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResourceStore {
    inner: Arc<StoreInner>,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStore")
            .field("config", &self.inner.config)
            .field("stats", &self.inner.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl ResourceStore {
    /// Create a store with the default configuration, system clock and
    /// default spawner.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    fn from_weak(inner: &Weak<StoreInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// The store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Current time according to the store's clock.
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Activity counters.
    pub fn stats(&self) -> StoreStats {
        self.inner.stats.snapshot()
    }

    /// Record the max age of `definition`'s type for use by `update`.
    pub fn register(&self, definition: &ResourceDefinition) {
        self.inner
            .state()
            .max_ages
            .insert(definition.resource_type().to_string(), definition.max_age_ms());
    }

    /// Get the entry for `(resource_type, key)`, creating a default entry
    /// if there is none. Never fetches.
    pub fn get_or_create(&self, resource_type: &str, key: &str) -> ResourceSlice {
        self.inner.state().get_or_create(resource_type, key).slice()
    }

    /// Get the entry for `(resource_type, key)` without creating it.
    pub fn peek(&self, resource_type: &str, key: &str) -> Option<ResourceSlice> {
        self.inner.state().entry(resource_type, key).map(ResourceEntry::slice)
    }

    /// Handle on the fetch in flight for `(resource_type, key)`, if any.
    pub fn pending(&self, resource_type: &str, key: &str) -> Option<InFlight> {
        self.inner
            .state()
            .entry(resource_type, key)
            .and_then(|entry| entry.promise.clone())
    }

    /// Handles on every fetch currently in flight.
    pub fn all_pending(&self) -> Vec<InFlight> {
        self.inner
            .state()
            .data
            .values()
            .flat_map(|entries| entries.values())
            .filter_map(|entry| entry.promise.clone())
            .collect()
    }

    /// Load `definition` for `ctx` unless the entry is fresh or already
    /// loading.
    ///
    /// The data loader is called on the caller's thread, so a panic in it
    /// reaches the caller and leaves the entry as it was. The future it
    /// returns runs on the store's spawner and its outcome lands in the
    /// entry. Key derivation errors and a spawner that refuses the fetch
    /// are returned; load failures are not.
    pub fn get_resource_from_remote(
        &self,
        definition: &ResourceDefinition,
        ctx: &RouterContext,
        options: FetchOptions,
    ) -> Result<(), ResourceError> {
        let key = derive_key(definition, ctx)?;
        let resource_type = definition.resource_type();
        let now = self.now_ms();

        let (in_flight, sender, generation) = {
            let mut state = self.inner.state();
            state
                .max_ages
                .insert(resource_type.to_string(), definition.max_age_ms());

            let entry = state.get_or_create(resource_type, &key);
            if entry.is_loading() {
                self.inner.stats.deduplicated();
                debug!(resource_type, key = %key, "joining fetch already in flight");
                return Ok(());
            }
            if !options.prefetch && entry.is_fresh(now) {
                entry.accessed_at = now;
                self.inner.stats.fresh_hit();
                debug!(resource_type, key = %key, expires_at = entry.expires_at, "entry is fresh");
                return Ok(());
            }

            let generation = state.bump_generation();
            let (sender, receiver) = oneshot::channel();
            let in_flight = InFlight::new(self.fetch_task(definition, receiver, &key, generation));

            let entry = state.get_or_create(resource_type, &key);
            entry.generation = generation;
            entry.promise = Some(in_flight.clone());
            (in_flight, sender, generation)
        };

        if self.inner.spawner.spawn(in_flight.task()).is_err() {
            self.abandon(resource_type, &key, generation);
            warn!(resource_type, key = %key, "spawner refused fetch");
            return Err(ResourceError::Spawn(format!(
                "no executor accepted the fetch for '{}' key '{}'",
                resource_type, key
            )));
        }

        let extra = ResourceExtra {
            is_prefetch: options.prefetch,
        };
        let data = match panic::catch_unwind(AssertUnwindSafe(|| definition.load(ctx, &extra))) {
            Ok(data) => data,
            Err(payload) => {
                drop(sender);
                self.abandon(resource_type, &key, generation);
                warn!(resource_type, key = %key, "data loader panicked");
                panic::resume_unwind(payload);
            }
        };
        // The receiving task is owned by `in_flight`, which is still alive.
        let _ = sender.send(data);

        self.inner.stats.fetch_started();
        debug!(resource_type, key = %key, prefetch = options.prefetch, "starting fetch");
        if let Some(slice) = self.peek(resource_type, &key) {
            self.notify(resource_type, &key, &slice);
        }
        Ok(())
    }

    fn fetch_task(
        &self,
        definition: &ResourceDefinition,
        data: oneshot::Receiver<DataFuture>,
        key: &str,
        generation: u64,
    ) -> Task {
        let store = Arc::downgrade(&self.inner);
        let definition = definition.clone();
        let key = key.to_string();

        async move {
            let Ok(data) = data.await else {
                debug!(
                    resource_type = definition.resource_type(),
                    key = %key,
                    "fetch abandoned before its loader returned"
                );
                return;
            };
            let result = data.await;
            match Self::from_weak(&store) {
                Some(store) => store.settle(&definition, &key, generation, result),
                None => debug!(
                    resource_type = definition.resource_type(),
                    key = %key,
                    "store dropped before fetch settled"
                ),
            }
        }
        .boxed()
    }

    /// Undo a fetch that never started. A later settle for `generation` is
    /// discarded.
    fn abandon(&self, resource_type: &str, key: &str, generation: u64) {
        let mut state = self.inner.state();
        let superseding = state.bump_generation();
        if let Some(entry) = state
            .entry_mut(resource_type, key)
            .filter(|entry| entry.generation == generation)
        {
            entry.promise = None;
            entry.generation = superseding;
        }
    }

    /// Apply a finished load if it is still the entry's current attempt.
    fn settle(
        &self,
        definition: &ResourceDefinition,
        key: &str,
        generation: u64,
        result: Result<Value, FetchError>,
    ) {
        let resource_type = definition.resource_type();
        let now = self.now_ms();

        let slice = {
            let mut state = self.inner.state();
            let entry = match state.entry_mut(resource_type, key) {
                Some(entry) if entry.generation == generation => entry,
                _ => {
                    self.inner.stats.stale_discarded();
                    debug!(resource_type, key, generation, "discarding superseded fetch result");
                    return;
                }
            };

            entry.promise = None;
            match result {
                Ok(value) => {
                    entry.data = Some(value).filter(|v| !v.is_null());
                    entry.error = None;
                    entry.expires_at = now.saturating_add(definition.max_age_ms());
                    entry.accessed_at = now;
                    self.inner.stats.fetch_succeeded();
                    debug!(resource_type, key, expires_at = entry.expires_at, "fetch succeeded");
                }
                Err(error) => {
                    warn!(resource_type, key, error = %error, "fetch failed");
                    entry.error = Some(error);
                    self.inner.stats.fetch_failed();
                }
            }
            entry.slice()
        };

        self.notify(resource_type, key, &slice);
    }

    /// Replace the entry's data locally, without a network round trip.
    ///
    /// Drops any in-flight fetch for the entry; its result will be
    /// discarded. The updater runs while the store is locked and must not
    /// call back into the store.
    pub fn update<F>(&self, resource_type: &str, key: &str, updater: F)
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        let now = self.now_ms();

        let slice = {
            let mut state = self.inner.state();
            let max_age = state
                .max_ages
                .get(resource_type)
                .copied()
                .unwrap_or(self.inner.config.default_max_age_ms);
            let generation = state.bump_generation();

            let entry = state.get_or_create(resource_type, key);
            if entry.is_loading() {
                debug!(resource_type, key, "update supersedes fetch in flight");
            }
            entry.data = updater(entry.data.take()).filter(|v| !v.is_null());
            entry.error = None;
            entry.promise = None;
            entry.generation = generation;
            entry.expires_at = now.saturating_add(max_age);
            entry.accessed_at = now;
            entry.slice()
        };

        self.notify(resource_type, key, &slice);
    }

    /// Mark the entry stale, keeping its data. No-op for unknown entries.
    pub fn invalidate(&self, resource_type: &str, key: &str) {
        let slice = {
            let mut state = self.inner.state();
            match state.entry_mut(resource_type, key) {
                Some(entry) => {
                    entry.expires_at = 0;
                    entry.slice()
                }
                None => return,
            }
        };

        debug!(resource_type, key, "entry invalidated");
        self.notify(resource_type, key, &slice);
    }

    /// Remove the entry. A type left with no entries is removed too.
    pub fn clear(&self, resource_type: &str, key: &str) {
        let removed = {
            let mut state = self.inner.state();
            let Some(entries) = state.data.get_mut(resource_type) else {
                return;
            };
            let removed = entries.remove(key).is_some();
            if entries.is_empty() {
                state.data.remove(resource_type);
            }
            removed
        };

        if removed {
            debug!(resource_type, key, "entry cleared");
            self.notify(resource_type, key, &ResourceSlice::empty(key));
        }
    }

    /// Remove every entry of `resource_type`.
    pub fn clear_all(&self, resource_type: &str) {
        let removed = self
            .inner
            .state()
            .data
            .remove(resource_type)
            .map(|entries| entries.len())
            .unwrap_or(0);
        if removed == 0 {
            return;
        }

        debug!(resource_type, removed, "type cleared");

        let listeners = self.inner.listeners.lock().listeners_for_type(resource_type);
        for (key, listener) in listeners {
            listener(&ResourceSlice::empty(key));
        }
    }

    /// Seed entries from a snapshot. Entries already present win.
    pub fn hydrate(&self, snapshot: HydrationSnapshot) {
        if !self.inner.config.accept_hydration {
            debug!(entries = snapshot.len(), "hydration disabled; snapshot ignored");
            return;
        }

        let now = self.now_ms();
        let mut seeded = Vec::new();

        {
            let mut state = self.inner.state();
            if state.hydrated_context.is_none() {
                state.hydrated_context = Some(snapshot.resource_context);
            }

            for (resource_type, entries) in snapshot.resource_data {
                for (key, wire) in entries {
                    if state.entry(&resource_type, &key).is_some() {
                        debug!(resource_type = %resource_type, key = %key, "entry exists; hydrated copy skipped");
                        continue;
                    }
                    let generation = state.bump_generation();
                    let entry = wire.into_entry(&key, generation, now);
                    seeded.push((resource_type.clone(), key.clone(), entry.slice()));
                    state
                        .data
                        .entry(resource_type.clone())
                        .or_default()
                        .insert(key, entry);
                }
            }
        }

        self.inner.stats.hydrated(seeded.len() as u64);
        debug!(entries = seeded.len(), "store hydrated");

        for (resource_type, key, slice) in seeded {
            self.notify(&resource_type, &key, &slice);
        }
    }

    /// Build the snapshot a server ships to the client.
    pub fn dehydrate(&self, context: RouterContext) -> HydrationSnapshot {
        let state = self.inner.state();
        let resource_data: ResourceData = state
            .data
            .iter()
            .map(|(resource_type, entries)| {
                let entries = entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), EntrySlice::from_entry(entry)))
                    .collect();
                (resource_type.clone(), entries)
            })
            .collect();

        HydrationSnapshot {
            resource_context: context,
            resource_data,
        }
    }

    /// Navigation context of the first accepted hydration snapshot.
    pub fn hydrated_context(&self) -> Option<RouterContext> {
        self.inner.state().hydrated_context.clone()
    }

    /// Read-only copy of every entry.
    pub fn get_state(&self) -> StoreSnapshot {
        let state = self.inner.state();
        let data = state
            .data
            .iter()
            .map(|(resource_type, entries)| {
                let entries = entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.slice()))
                    .collect();
                (resource_type.clone(), entries)
            })
            .collect();

        StoreSnapshot { data }
    }

    /// Watch `(resource_type, key)` for changes.
    pub fn subscribe<F>(&self, resource_type: &str, key: &str, listener: F) -> Subscription
    where
        F: Fn(&ResourceSlice) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.inner.listeners.subscribe(resource_type, key, listener)
    }

    fn notify(&self, resource_type: &str, key: &str, slice: &ResourceSlice) {
        let listeners = self.inner.listeners.lock().listeners_for(resource_type, key);
        for listener in listeners {
            listener(slice);
        }
    }
}

/// Builder for [`ResourceStore`].
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    clock: Option<Arc<dyn Clock>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
}

impl StoreBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Set the task spawner.
    pub fn spawner(mut self, spawner: impl TaskSpawner + 'static) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Build the store.
    pub fn build(self) -> ResourceStore {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let spawner = self.spawner.unwrap_or_else(default_spawner);

        ResourceStore {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                listeners: Listeners::default(),
                clock,
                spawner,
                config: self.config,
                stats: StatsCollector::default(),
            }),
        }
    }
}

#[cfg(feature = "tokio")]
fn default_spawner() -> Arc<dyn TaskSpawner> {
    Arc::new(crate::spawn::TokioSpawner::new())
}

#[cfg(not(feature = "tokio"))]
fn default_spawner() -> Arc<dyn TaskSpawner> {
    Arc::new(crate::spawn::NoopSpawner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::spawn::NoopSpawner;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use turbo_router::Route;

    fn test_store(clock: &ManualClock) -> ResourceStore {
        ResourceStore::builder()
            .clock(clock.clone())
            .spawner(NoopSpawner)
            .build()
    }

    fn constant_resource(calls: &Arc<AtomicUsize>, max_age_ms: u64) -> ResourceDefinition {
        let calls = Arc::clone(calls);
        ResourceDefinition::builder("T")
            .get_key(|_| Ok("K".to_string()))
            .get_data(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, FetchError>("D") }
            })
            .max_age(Duration::from_millis(max_age_ms))
            .build()
            .unwrap()
    }

    async fn settle(store: &ResourceStore, resource_type: &str, key: &str) {
        if let Some(pending) = store.pending(resource_type, key) {
            pending.await;
        }
    }

    // === getOrCreate ===

    #[test]
    fn test_get_or_create_default_entry() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);

        assert!(store.peek("T", "K").is_none());
        assert_eq!(store.get_or_create("T", "K"), ResourceSlice::empty("K"));
        assert_eq!(store.peek("T", "K"), Some(ResourceSlice::empty("K")));
        assert_eq!(store.stats().fetches_started, 0);
    }

    // === getResourceFromRemote ===

    #[tokio::test]
    async fn test_fetch_populates_entry() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);

        store
            .get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
            .unwrap();
        let loading = store.peek("T", "K").unwrap();
        assert!(loading.loading);

        settle(&store, "T", "K").await;

        let state = store.get_state();
        assert_eq!(
            state.get("T", "K"),
            Some(&ResourceSlice {
                data: Some(json!("D")),
                error: None,
                loading: false,
                expires_at: 100,
                accessed_at: 0,
                key: "K".to_string(),
            })
        );
        assert!(store.pending("T", "K").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_fetch_once() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);
        let ctx = RouterContext::default();

        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        store.get_resource_from_remote(&def, &ctx, FetchOptions::prefetch()).unwrap();
        settle(&store, "T", "K").await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = store.stats();
        assert_eq!(stats.fetches_started, 1);
        assert_eq!(stats.deduplicated, 2);
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);
        let ctx = RouterContext::default();

        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        settle(&store, "T", "K").await;
        assert_eq!(store.peek("T", "K").unwrap().expires_at, 100);

        clock.set(50);
        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        assert!(store.pending("T", "K").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.peek("T", "K").unwrap().accessed_at, 50);

        clock.set(150);
        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        settle(&store, "T", "K").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.peek("T", "K").unwrap().expires_at, 250);
        assert_eq!(store.stats().fresh_hits, 1);
    }

    #[tokio::test]
    async fn test_prefetch_bypasses_freshness() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);
        let ctx = RouterContext::default();

        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        settle(&store, "T", "K").await;
        store.get_resource_from_remote(&def, &ctx, FetchOptions::prefetch()).unwrap();
        settle(&store, "T", "K").await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_preserves_data() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let def = ResourceDefinition::builder("T")
            .get_key(|_| Ok("K".to_string()))
            .get_data(|_, _| async { Err::<String, _>(FetchError::Timeout) })
            .build()
            .unwrap();

        store.update("T", "K", |_| Some(json!("cached")));
        clock.set(10);
        store
            .get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
            .unwrap();
        settle(&store, "T", "K").await;

        let slice = store.peek("T", "K").unwrap();
        assert_eq!(slice.data, Some(json!("cached")));
        assert_eq!(slice.error, Some(FetchError::Timeout));
        assert!(!slice.loading);
        assert_eq!(slice.expires_at, 0);
        assert_eq!(store.stats().fetches_failed, 1);
    }

    #[tokio::test]
    async fn test_success_clears_error() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 0);

        store.hydrate(HydrationSnapshot::default().with_entry(
            "T",
            EntrySlice {
                error: Some(FetchError::Timeout),
                ..EntrySlice::loaded("K", json!("old"), 0)
            },
        ));
        store
            .get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
            .unwrap();
        settle(&store, "T", "K").await;

        let slice = store.peek("T", "K").unwrap();
        assert_eq!(slice.error, None);
        assert_eq!(slice.data, Some(json!("D")));
    }

    #[test]
    fn test_key_errors_propagate() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let def = ResourceDefinition::builder("T")
            .get_key(|_| Err(ResourceError::missing_input("T", "param:id")))
            .get_data(|_, _| async { Ok::<_, FetchError>(()) })
            .build()
            .unwrap();

        let err = store
            .get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, ResourceError::MissingKeyInput { .. }));
        assert!(store.get_state().data.is_empty());
    }

    #[test]
    fn test_loader_panic_reaches_caller() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let def = ResourceDefinition::builder("T")
            .get_key(|_| Ok("K".to_string()))
            .get_data(|ctx, _| {
                let id = ctx.param("id").expect("route has an id").to_string();
                async move { Ok::<_, FetchError>(id) }
            })
            .build()
            .unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            store.get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
        }));
        assert!(outcome.is_err());

        let slice = store.peek("T", "K").unwrap();
        assert!(!slice.loading);
        assert!(store.pending("T", "K").is_none());
        assert_eq!(store.stats().fetches_started, 0);

        // The next trigger starts a fresh fetch instead of joining a dead one.
        let ctx = RouterContext::for_route(Route::new("item", "/item/:id"), [("id", "7")]);
        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        assert!(store.peek("T", "K").unwrap().loading);
        assert_eq!(store.stats().deduplicated, 0);
        assert_eq!(store.stats().fetches_started, 1);
    }

    #[test]
    fn test_refused_spawn_rolls_back_entry() {
        struct RefusingSpawner;

        impl TaskSpawner for RefusingSpawner {
            fn spawn(&self, task: Task) -> Result<(), Task> {
                Err(task)
            }
        }

        let store = ResourceStore::builder()
            .clock(ManualClock::new(0))
            .spawner(RefusingSpawner)
            .build();
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);
        let ctx = RouterContext::default();

        for _ in 0..2 {
            let err = store
                .get_resource_from_remote(&def, &ctx, FetchOptions::default())
                .unwrap_err();
            assert!(matches!(err, ResourceError::Spawn(_)));
            assert!(!store.peek("T", "K").unwrap().loading);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let stats = store.stats();
        assert_eq!(stats.fetches_started, 0);
        assert_eq!(stats.deduplicated, 0);
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_default_store_outside_runtime_reports_error() {
        let store = ResourceStore::builder().clock(ManualClock::new(0)).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);

        let err = store
            .get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
            .unwrap_err();

        assert!(matches!(err, ResourceError::Spawn(_)));
        assert!(!store.peek("T", "K").unwrap().loading);
        assert!(store.pending("T", "K").is_none());
    }

    // === Superseded fetches ===

    #[tokio::test]
    async fn test_update_discards_in_flight_result() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);

        store
            .get_resource_from_remote(&def, &RouterContext::default(), FetchOptions::default())
            .unwrap();
        let in_flight = store.pending("T", "K").unwrap();

        store.update("T", "K", |_| Some(json!("optimistic")));
        assert!(!store.peek("T", "K").unwrap().loading);

        in_flight.await;

        assert_eq!(store.peek("T", "K").unwrap().data, Some(json!("optimistic")));
        assert_eq!(store.stats().stale_discarded, 1);
        assert_eq!(store.stats().fetches_succeeded, 0);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_result() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let def = constant_resource(&calls, 100);
        let ctx = RouterContext::default();

        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        let first = store.pending("T", "K").unwrap();
        store.clear("T", "K");

        first.await;
        assert!(store.peek("T", "K").is_none());

        // A recreated entry must not accept the old attempt either.
        store.get_resource_from_remote(&def, &ctx, FetchOptions::default()).unwrap();
        settle(&store, "T", "K").await;
        assert_eq!(store.peek("T", "K").unwrap().data, Some(json!("D")));
        assert_eq!(store.stats().stale_discarded, 1);
    }

    // === update ===

    #[test]
    fn test_update_uses_registered_max_age() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        store.register(&constant_resource(&calls, 100));

        store.update("T", "K", |_| Some(json!("new")));

        let slice = store.peek("T", "K").unwrap();
        assert_eq!(slice.data, Some(json!("new")));
        assert_eq!(slice.expires_at, 100);
        assert_eq!(slice.accessed_at, 0);
    }

    #[test]
    fn test_update_falls_back_to_config_max_age() {
        let clock = ManualClock::new(1_000);
        let store = ResourceStore::builder()
            .clock(clock.clone())
            .spawner(NoopSpawner)
            .config(StoreConfig::new().with_default_max_age(Duration::from_millis(20)))
            .build();

        store.update("U", "K", |_| Some(json!(1)));
        assert_eq!(store.peek("U", "K").unwrap().expires_at, 1_020);
    }

    #[test]
    fn test_update_composes() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);

        store.update("T", "K", |_| Some(json!("current")));
        let mut seen = None;
        store.update("T", "K", |prev| {
            seen = prev.clone();
            prev
        });

        assert_eq!(seen, Some(json!("current")));
    }

    #[test]
    fn test_update_to_null_keeps_entry() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);

        store.update("T", "K", |_| Some(json!("x")));
        store.update("T", "K", |_| None);

        let slice = store.peek("T", "K").unwrap();
        assert_eq!(slice.data, None);
        assert_eq!(slice.key, "K");
    }

    // === clear / clearAll / invalidate ===

    #[test]
    fn test_clear_removes_entry_and_empty_type() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        store.update("T", "A", |_| Some(json!(1)));
        store.update("T", "B", |_| Some(json!(2)));

        store.clear("T", "A");
        assert!(store.peek("T", "A").is_none());
        assert!(store.peek("T", "B").is_some());

        store.clear("T", "B");
        assert!(!store.get_state().data.contains_key("T"));

        store.clear("T", "B");
        store.clear("missing", "B");
        assert_eq!(store.get_or_create("T", "A"), ResourceSlice::empty("A"));
    }

    #[test]
    fn test_clear_all_removes_type_only() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        store.update("T", "A", |_| Some(json!(1)));
        store.update("T", "B", |_| Some(json!(2)));
        store.update("U", "A", |_| Some(json!(3)));

        store.clear_all("T");

        let state = store.get_state();
        assert!(!state.data.contains_key("T"));
        assert!(state.get("U", "A").is_some());
        store.clear_all("T");
    }

    #[test]
    fn test_invalidate_keeps_data() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        store.register(&constant_resource(&Arc::new(AtomicUsize::new(0)), 100));
        store.update("T", "K", |_| Some(json!(1)));

        store.invalidate("T", "K");
        store.invalidate("T", "missing");

        let slice = store.peek("T", "K").unwrap();
        assert_eq!(slice.expires_at, 0);
        assert_eq!(slice.data, Some(json!(1)));
        assert!(store.peek("T", "missing").is_none());
    }

    // === Hydration ===

    #[test]
    fn test_hydrate_first_write_wins() {
        let clock = ManualClock::new(5);
        let store = test_store(&clock);
        store.update("T", "existing", |_| Some(json!("client")));

        let snapshot = HydrationSnapshot::default()
            .with_entry("T", EntrySlice::loaded("existing", json!("server"), 99))
            .with_entry("T", EntrySlice::loaded("new", json!("server"), 99));
        store.hydrate(snapshot);

        assert_eq!(store.peek("T", "existing").unwrap().data, Some(json!("client")));
        let seeded = store.peek("T", "new").unwrap();
        assert_eq!(seeded.data, Some(json!("server")));
        assert_eq!(seeded.expires_at, 99);
        assert_eq!(seeded.accessed_at, 5);
        assert_eq!(store.stats().hydrated_entries, 1);
    }

    #[test]
    fn test_hydrate_keeps_first_context() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let first = RouterContext::default().with_query([("a", "1")]);
        let second = RouterContext::default().with_query([("b", "2")]);

        store.hydrate(HydrationSnapshot::new(first.clone()));
        store.hydrate(HydrationSnapshot::new(second));

        assert_eq!(store.hydrated_context(), Some(first));
        assert!(store.get_state().data.is_empty());
    }

    #[test]
    fn test_hydrate_disabled() {
        let store = ResourceStore::builder()
            .clock(ManualClock::new(0))
            .spawner(NoopSpawner)
            .config(StoreConfig::new().with_hydration(false))
            .build();

        store.hydrate(
            HydrationSnapshot::default().with_entry("T", EntrySlice::loaded("K", json!(1), 0)),
        );
        assert!(store.peek("T", "K").is_none());
        assert!(store.hydrated_context().is_none());
    }

    #[test]
    fn test_dehydrate_round_trip() {
        let clock = ManualClock::new(0);
        let server = test_store(&clock);
        server.register(&constant_resource(&Arc::new(AtomicUsize::new(0)), 100));
        server.update("T", "K", |_| Some(json!({"name": "widget"})));

        let ctx = RouterContext::default().with_query([("q", "w")]);
        let json = server.dehydrate(ctx.clone()).to_json().unwrap();

        let client = test_store(&clock);
        client.hydrate(HydrationSnapshot::from_json(&json).unwrap());

        assert_eq!(client.hydrated_context(), Some(ctx));
        assert_eq!(client.get_state(), server.get_state());
    }

    // === Subscriptions ===

    #[test]
    fn test_listeners_see_changes_until_dropped() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let sub = store.subscribe("T", "K", move |slice| {
            sink.lock().unwrap().push(slice.data.clone());
        });

        store.update("T", "K", |_| Some(json!(1)));
        store.update("T", "other", |_| Some(json!(2)));
        store.clear("T", "K");
        drop(sub);
        store.update("T", "K", |_| Some(json!(3)));

        assert_eq!(*seen.lock().unwrap(), vec![Some(json!(1)), None]);
    }

    #[test]
    fn test_clear_all_notifies_every_key() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let count = Arc::new(AtomicUsize::new(0));
        store.update("T", "A", |_| Some(json!(1)));
        store.update("T", "B", |_| Some(json!(2)));

        let subs: Vec<_> = ["A", "B"]
            .iter()
            .map(|key| {
                let count = Arc::clone(&count);
                store.subscribe("T", key, move |slice| {
                    assert!(slice.data.is_none());
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        store.clear_all("T");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Nothing left to remove: listeners stay quiet.
        store.clear_all("T");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(subs);
    }

    #[test]
    fn test_listener_may_read_store() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let reader = store.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);

        let _sub = store.subscribe("T", "K", move |_| {
            if reader.peek("T", "K").is_some() {
                sink.fetch_add(1, Ordering::SeqCst);
            }
        });
        store.update("T", "K", |_| Some(json!(1)));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
