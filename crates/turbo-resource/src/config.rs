//! Store configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ResourceError;

/// Configuration for a [`ResourceStore`](crate::ResourceStore).
///
/// Loadable from TOML or JSON:
///
/// ```toml
/// default_max_age_ms = 30000
/// accept_hydration = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Max age applied by `update` to types with no registered definition.
    pub default_max_age_ms: u64,
    /// Whether `hydrate` merges snapshots or ignores them.
    pub accept_hydration: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_max_age_ms: 0,
            accept_hydration: true,
        }
    }
}

impl StoreConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback max age.
    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age_ms = duration_ms(max_age);
        self
    }

    /// Enable or disable hydration.
    pub fn with_hydration(mut self, enabled: bool) -> Self {
        self.accept_hydration = enabled;
        self
    }

    /// Parse from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ResourceError> {
        toml::from_str(content).map_err(|e| ResourceError::Config(e.to_string()))
    }

    /// Parse from a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, ResourceError> {
        serde_json::from_str(content).map_err(|e| ResourceError::Config(e.to_string()))
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResourceError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
