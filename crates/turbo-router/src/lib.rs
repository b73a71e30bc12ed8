//! Navigation context for TurboCommerce data loading.
//!
//! The router resolves the current location into a [`RouterContext`]:
//!
//! ```text
//! /product/42?tab=reviews
//!   route  -> { name: "product", path: "/product/:id" }
//!   match  -> { params: { id: "42" }, url: "/product/42", is_exact: true }
//!   query  -> { tab: "reviews" }
//! ```
//!
//! Resource caches treat the context as a read-only input when deriving
//! cache keys and when calling a resource's data loader.
//!
//! # Usage
//!
//! ```rust
//! use turbo_router::prelude::*;
//!
//! let route = Route::new("product", "/product/:id");
//! let ctx = RouterContext::for_route(route, [("id", "42")]).with_query([("tab", "reviews")]);
//!
//! assert_eq!(ctx.param("id"), Some("42"));
//! assert_eq!(ctx.query_param("tab"), Some("reviews"));
//! ```

mod context;
pub mod prelude;

pub use context::*;
