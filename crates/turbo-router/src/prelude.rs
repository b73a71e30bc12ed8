//! Prelude for convenient imports.
//!
//! ```rust,ignore
//! use turbo_router::prelude::*;
//! ```

pub use crate::{QueryParams, Route, RouteMatch, RouteParams, RouterContext};
