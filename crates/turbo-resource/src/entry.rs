//! Cache entries and their read-only snapshots.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spawn::InFlight;
use crate::{FetchError, ResourceError};

/// The cached state for one (type, key) pair. Owned by the store.
pub(crate) struct ResourceEntry {
    pub(crate) data: Option<Value>,
    pub(crate) error: Option<FetchError>,
    pub(crate) promise: Option<InFlight>,
    pub(crate) expires_at: u64,
    pub(crate) accessed_at: u64,
    pub(crate) key: String,
    /// Identifies the attempt allowed to write; bumped by every superseding action.
    pub(crate) generation: u64,
}

impl ResourceEntry {
    pub(crate) fn new(key: impl Into<String>, generation: u64) -> Self {
        Self {
            data: None,
            error: None,
            promise: None,
            expires_at: 0,
            accessed_at: 0,
            key: key.into(),
            generation,
        }
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.promise.is_some()
    }

    pub(crate) fn is_fresh(&self, now: u64) -> bool {
        self.expires_at > now
    }

    pub(crate) fn slice(&self) -> ResourceSlice {
        ResourceSlice {
            data: self.data.clone(),
            error: self.error.clone(),
            loading: self.is_loading(),
            expires_at: self.expires_at,
            accessed_at: self.accessed_at,
            key: self.key.clone(),
        }
    }
}

/// A read-only snapshot of a cache entry.
///
/// `loading` is true exactly while a fetch is in flight for the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSlice {
    /// Last loaded or written data; `None` is an explicit null.
    pub data: Option<Value>,
    /// Error of the last failed load.
    pub error: Option<FetchError>,
    /// Whether a load is in flight.
    pub loading: bool,
    /// Epoch ms until which the data is fresh; 0 means always stale.
    pub expires_at: u64,
    /// Epoch ms of the last read or write.
    pub accessed_at: u64,
    /// Cache key within the resource type.
    pub key: String,
}

impl ResourceSlice {
    /// The snapshot of a freshly created entry.
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            data: None,
            error: None,
            loading: false,
            expires_at: 0,
            accessed_at: 0,
            key: key.into(),
        }
    }

    /// Check if the data is still fresh at `now`.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.expires_at > now_ms
    }

    /// Decode the data into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, ResourceError> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(ResourceError::from)
    }
}
