//! Error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by resource definitions and store configuration.
///
/// These indicate programming or configuration mistakes and are returned to
/// the caller of the triggering action. Data loading failures are captured
/// in the cache entry as [`FetchError`] instead.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The resource definition is malformed.
    #[error("Invalid resource definition: {0}")]
    InvalidDefinition(String),

    /// An input required to derive the cache key is missing from the context.
    #[error("Missing key input for resource '{resource_type}': {input}")]
    MissingKeyInput {
        resource_type: String,
        input: String,
    },

    /// Cached data could not be converted to the requested type.
    #[error("Failed to decode resource data: {0}")]
    Decode(#[from] serde_json::Error),

    /// The store's spawner refused to run a fetch.
    #[error("Failed to start fetch: {0}")]
    Spawn(String),

    /// Store configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResourceError {
    /// Shorthand for a missing key input.
    pub fn missing_input(resource_type: impl Into<String>, input: impl Into<String>) -> Self {
        Self::MissingKeyInput {
            resource_type: resource_type.into(),
            input: input.into(),
        }
    }
}

/// Errors produced by a resource's data loader.
///
/// Stored on the cache entry and carried through hydration snapshots, so it
/// is serializable and cheap to clone.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    /// Failed to send the request.
    #[error("Request failed: {0}")]
    Request(String),

    /// HTTP error response.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Failed to parse response body.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl FetchError {
    /// Create a request error from any displayable cause.
    pub fn request(cause: impl std::fmt::Display) -> Self {
        Self::Request(cause.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Json(e.to_string())
    }
}
