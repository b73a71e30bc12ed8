//! Cache key derivation.

use serde::{Deserialize, Serialize};
use turbo_router::RouterContext;

use crate::definition::ResourceDefinition;
use crate::ResourceError;

/// Derive the cache key for `definition` under `ctx`.
///
/// Pure and cheap; called on every read, never cached.
pub fn derive_key(
    definition: &ResourceDefinition,
    ctx: &RouterContext,
) -> Result<String, ResourceError> {
    (definition.get_key)(ctx)
}

/// Component of a resource key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyComponent {
    /// The route name.
    RouteName,
    /// The route pattern.
    RoutePath,
    /// The matched URL.
    Url,
    /// A route parameter, rendered as its bare value.
    Param { name: String, required: bool },
    /// A query parameter, rendered as `name=value`.
    QueryParam { name: String, required: bool },
    /// All query parameters in key order.
    AllQueryParams,
    /// Custom static value.
    Custom(String),
}

/// Builder for composing resource keys from navigation context.
///
/// ```rust
/// use turbo_resource::ResourceKeyBuilder;
/// use turbo_router::{Route, RouterContext};
///
/// let builder = ResourceKeyBuilder::new().required_param("id").query_param("tab");
/// let ctx = RouterContext::for_route(Route::new("product", "/product/:id"), [("id", "42")])
///     .with_query([("tab", "reviews")]);
///
/// assert_eq!(builder.build("product", &ctx).unwrap(), "42|tab=reviews");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResourceKeyBuilder {
    components: Vec<KeyComponent>,
    prefix: Option<String>,
    hashed: bool,
}

impl ResourceKeyBuilder {
    /// Create a new key builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for the key.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Render the key as a fixed-length hex hash of its parts.
    pub fn hashed(mut self) -> Self {
        self.hashed = true;
        self
    }

    /// Include the route name.
    pub fn route_name(mut self) -> Self {
        self.components.push(KeyComponent::RouteName);
        self
    }

    /// Include the route pattern.
    pub fn route_path(mut self) -> Self {
        self.components.push(KeyComponent::RoutePath);
        self
    }

    /// Include the matched URL.
    pub fn url(mut self) -> Self {
        self.components.push(KeyComponent::Url);
        self
    }

    /// Include a route parameter if present.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.components.push(KeyComponent::Param {
            name: name.into(),
            required: false,
        });
        self
    }

    /// Include a route parameter; building fails when it is absent.
    pub fn required_param(mut self, name: impl Into<String>) -> Self {
        self.components.push(KeyComponent::Param {
            name: name.into(),
            required: true,
        });
        self
    }

    /// Include a query parameter if present.
    pub fn query_param(mut self, name: impl Into<String>) -> Self {
        self.components.push(KeyComponent::QueryParam {
            name: name.into(),
            required: false,
        });
        self
    }

    /// Include a query parameter; building fails when it is absent.
    pub fn required_query_param(mut self, name: impl Into<String>) -> Self {
        self.components.push(KeyComponent::QueryParam {
            name: name.into(),
            required: true,
        });
        self
    }

    /// Include all query parameters.
    pub fn all_query_params(mut self) -> Self {
        self.components.push(KeyComponent::AllQueryParams);
        self
    }

    /// Include a custom static value.
    pub fn custom(mut self, value: impl Into<String>) -> Self {
        self.components.push(KeyComponent::Custom(value.into()));
        self
    }

    /// Get the configured components.
    pub fn components(&self) -> &[KeyComponent] {
        &self.components
    }

    /// Build the key for `resource_type` from context.
    pub fn build(&self, resource_type: &str, ctx: &RouterContext) -> Result<String, ResourceError> {
        let mut parts = Vec::new();

        if let Some(prefix) = &self.prefix {
            parts.push(prefix.clone());
        }

        for component in &self.components {
            match component {
                KeyComponent::RouteName => parts.push(ctx.route.name.clone()),
                KeyComponent::RoutePath => parts.push(ctx.route_match.path.clone()),
                KeyComponent::Url => parts.push(ctx.route_match.url.clone()),
                KeyComponent::Param { name, required } => match ctx.param(name) {
                    Some(value) => parts.push(value.to_string()),
                    None if *required => {
                        return Err(ResourceError::missing_input(
                            resource_type,
                            format!("param:{}", name),
                        ))
                    }
                    None => {}
                },
                KeyComponent::QueryParam { name, required } => match ctx.query_param(name) {
                    Some(value) => parts.push(format!("{}={}", name, value)),
                    None if *required => {
                        return Err(ResourceError::missing_input(
                            resource_type,
                            format!("query:{}", name),
                        ))
                    }
                    None => {}
                },
                KeyComponent::AllQueryParams => {
                    for (k, v) in &ctx.query {
                        parts.push(format!("{}={}", k, v));
                    }
                }
                KeyComponent::Custom(value) => parts.push(value.clone()),
            }
        }

        let key = parts.join("|");
        if self.hashed {
            Ok(format!("{:016x}", stable_hash(&key)))
        } else {
            Ok(key)
        }
    }
}

// FNV-1a; keys cross process boundaries in hydration snapshots, so the
// hash must not depend on the std hasher's per-release algorithm.
fn stable_hash(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
        (acc ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
