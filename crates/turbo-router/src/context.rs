//! Route, match and query context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Extracted route parameters (e.g., `:id` from `/product/:id`).
pub type RouteParams = BTreeMap<String, String>;

/// Query string parameters.
pub type QueryParams = BTreeMap<String, String>;

/// A route definition as known to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route name (unique within the route table).
    pub name: String,
    /// Route pattern (e.g., "/product/:id").
    pub path: String,
}

impl Route {
    /// Create a new route.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl Default for Route {
    fn default() -> Self {
        Self::new("default", "/*")
    }
}

/// The result of matching a location against a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    /// Extracted route parameters.
    #[serde(default)]
    pub params: RouteParams,
    /// Query parameters of the matched location.
    #[serde(default)]
    pub query: QueryParams,
    /// Whether the whole location was consumed by the pattern.
    #[serde(default)]
    pub is_exact: bool,
    /// The pattern that matched.
    pub path: String,
    /// The concrete matched URL.
    pub url: String,
}

impl RouteMatch {
    /// Build a match for `path` with the given params, generating the URL.
    pub fn new(path: impl Into<String>, params: RouteParams) -> Self {
        let path = path.into();
        let url = generate_url(&path, &params);
        Self {
            params,
            query: QueryParams::new(),
            is_exact: true,
            path,
            url,
        }
    }

    /// Get a route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }
}

impl Default for RouteMatch {
    fn default() -> Self {
        Self {
            params: RouteParams::new(),
            query: QueryParams::new(),
            is_exact: false,
            path: "/".to_string(),
            url: "/".to_string(),
        }
    }
}

/// Navigation context supplied by the router: the current route, its match
/// and the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterContext {
    /// Current route.
    pub route: Route,
    /// Match of the current location against `route`.
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    /// Query string parameters.
    #[serde(default)]
    pub query: QueryParams,
}

impl RouterContext {
    /// Create a context from its parts.
    pub fn new(route: Route, route_match: RouteMatch, query: QueryParams) -> Self {
        Self {
            route,
            route_match,
            query,
        }
    }

    /// Create a context for `route` with the given route params.
    ///
    /// The match path is the route pattern and the URL is generated by
    /// substituting the params into it.
    pub fn for_route<I, K, V>(route: Route, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let route_match = RouteMatch::new(route.path.clone(), params);
        Self {
            route,
            route_match,
            query: QueryParams::new(),
        }
    }

    /// Set query parameters on both the context and its match.
    pub fn with_query<I, K, V>(mut self, query: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let query: QueryParams = query
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.route_match.query = query.clone();
        self.query = query;
        self
    }

    /// Get a route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route_match.param(name)
    }

    /// Get a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }
}

/// Substitute `:name` and `:name?` segments of a route pattern.
///
/// Missing optional segments are dropped; missing required segments are
/// kept verbatim.
pub fn generate_url(pattern: &str, params: &RouteParams) -> String {
    let segments: Vec<String> = pattern
        .split('/')
        .filter_map(|segment| {
            let Some(name) = segment.strip_prefix(':') else {
                return Some(segment.to_string());
            };
            let (name, optional) = match name.strip_suffix('?') {
                Some(name) => (name, true),
                None => (name, false),
            };
            match params.get(name) {
                Some(value) => Some(value.clone()),
                None if optional => None,
                None => Some(segment.to_string()),
            }
        })
        .collect();

    let url = segments.join("/");
    if url.is_empty() {
        "/".to_string()
    } else {
        url
    }
}
