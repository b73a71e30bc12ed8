//! Hydration snapshots: cache state shipped from server to client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use turbo_router::RouterContext;

use crate::entry::ResourceEntry;
use crate::FetchError;

/// Wire form of one cache entry.
///
/// `promise` is always `null` on the wire; no in-flight fetch survives a
/// process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySlice {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<FetchError>,
    #[serde(default)]
    pub loading: bool,
    pub key: String,
    #[serde(default)]
    pub promise: Option<Value>,
    #[serde(default)]
    pub expires_at: u64,
}

impl EntrySlice {
    /// A loaded entry.
    pub fn loaded(key: impl Into<String>, data: Value, expires_at: u64) -> Self {
        Self {
            data: Some(data),
            error: None,
            loading: false,
            key: key.into(),
            promise: None,
            expires_at,
        }
    }

    pub(crate) fn from_entry(entry: &ResourceEntry) -> Self {
        Self {
            data: entry.data.clone(),
            error: entry.error.clone(),
            loading: false,
            key: entry.key.clone(),
            promise: None,
            expires_at: entry.expires_at,
        }
    }

    /// Turn into a store entry. `loading` is dropped since no fetch backs it.
    pub(crate) fn into_entry(self, key: &str, generation: u64, now: u64) -> ResourceEntry {
        let mut entry = ResourceEntry::new(key, generation);
        entry.data = self.data.filter(|v| !v.is_null());
        entry.error = self.error;
        entry.expires_at = self.expires_at;
        entry.accessed_at = now;
        entry
    }
}

/// Resource data grouped by type, then key.
pub type ResourceData = BTreeMap<String, BTreeMap<String, EntrySlice>>;

/// Snapshot seeded into a store once at start-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationSnapshot {
    /// Navigation context the snapshot was computed under.
    #[serde(default)]
    pub resource_context: RouterContext,
    /// Cache entries.
    #[serde(default)]
    pub resource_data: ResourceData,
}

impl HydrationSnapshot {
    /// Create an empty snapshot for `context`.
    pub fn new(context: RouterContext) -> Self {
        Self {
            resource_context: context,
            resource_data: ResourceData::new(),
        }
    }

    /// Add an entry.
    pub fn with_entry(mut self, resource_type: impl Into<String>, slice: EntrySlice) -> Self {
        self.resource_data
            .entry(resource_type.into())
            .or_default()
            .insert(slice.key.clone(), slice);
        self
    }

    /// Number of entries across all types.
    pub fn len(&self) -> usize {
        self.resource_data.values().map(BTreeMap::len).sum()
    }

    /// Check if the snapshot carries no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
