//! Keyed resource cache for TurboCommerce data loading.
//!
//! A *resource* is a named kind of remote data (a product, a cart, a search
//! page). Each resource derives a cache key from the current
//! [`RouterContext`](turbo_router::RouterContext) and knows how to load its
//! data. The [`ResourceStore`] holds one entry per `(type, key)`, loads each
//! entry at most once at a time, and keeps it fresh for the resource's max
//! age.
//!
//! ```text
//! RouterContext ──get_key──▶ key
//!                            │
//!   ResourceStore[type][key] ─┤ fresh?   ──▶ cached data
//!                             │ loading? ──▶ join the in-flight fetch
//!                             └ else     ──▶ spawn get_data, settle into entry
//! ```
//!
//! Consumers normally go through a [`ResourceBinding`], which re-derives
//! the key on every evaluation and returns the entry together with
//! [`BoundActions`] (`update`, `refresh`, `clear`, `clear_all`).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use turbo_resource::prelude::*;
//!
//! let product = ResourceDefinition::builder("product")
//!     .key_builder(ResourceKeyBuilder::new().required_param("id"))
//!     .get_data(|ctx, _extra| {
//!         let id = ctx.param("id").unwrap_or_default().to_string();
//!         async move { fetch_product(&id).await }
//!     })
//!     .max_age(Duration::from_secs(60))
//!     .build()?;
//!
//! let store = ResourceStore::new();
//! let mut binding = ResourceBinding::new(&store, product);
//!
//! let view = binding.evaluate(&router_context)?;
//! if let Some(product) = view.data_as::<Product>()? {
//!     render(product);
//! }
//! view.actions.refresh()?;
//! ```
//!
//! # Server rendering
//!
//! A server store is drained with [`ResourceStore::all_pending`] and shipped
//! to the client with [`ResourceStore::dehydrate`]. The client seeds its own
//! store once with [`ResourceStore::hydrate`]; entries the client already
//! holds are kept.

mod binding;
mod clock;
mod config;
mod definition;
mod entry;
mod error;
mod hydration;
mod key;
mod spawn;
mod stats;
mod store;
mod subscription;

pub use binding::{BoundActions, ResourceActions, ResourceBinding, ResourceView};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use definition::{DataFuture, ResourceDefinition, ResourceDefinitionBuilder, ResourceExtra};
pub use entry::ResourceSlice;
pub use error::{FetchError, ResourceError};
pub use hydration::{EntrySlice, HydrationSnapshot, ResourceData};
pub use key::{derive_key, KeyComponent, ResourceKeyBuilder};
#[cfg(feature = "tokio")]
pub use spawn::TokioSpawner;
pub use spawn::{InFlight, NoopSpawner, Task, TaskSpawner};
pub use stats::StoreStats;
pub use store::{FetchOptions, ResourceStore, StoreBuilder, StoreSnapshot};
pub use subscription::{Listener, Subscription};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        BoundActions, FetchError, FetchOptions, HydrationSnapshot, ResourceBinding,
        ResourceDefinition, ResourceError, ResourceExtra, ResourceKeyBuilder, ResourceSlice,
        ResourceStore, ResourceView, StoreConfig,
    };
    pub use turbo_router::RouterContext;
}
