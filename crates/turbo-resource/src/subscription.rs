//! Change notification for cache entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::entry::ResourceSlice;

/// Callback receiving the latest snapshot of a watched entry.
pub type Listener = Arc<dyn Fn(&ResourceSlice) + Send + Sync>;

type Slot = (String, String);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    slots: HashMap<Slot, Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    fn add(&mut self, slot: Slot, listener: Listener) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.slots.entry(slot).or_default().push((id, listener));
        id
    }

    fn remove(&mut self, slot: &Slot, id: u64) {
        if let Some(listeners) = self.slots.get_mut(slot) {
            listeners.retain(|(existing, _)| *existing != id);
            if listeners.is_empty() {
                self.slots.remove(slot);
            }
        }
    }

    pub(crate) fn listeners_for(&self, resource_type: &str, key: &str) -> Vec<Listener> {
        self.slots
            .get(&(resource_type.to_string(), key.to_string()))
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Listeners of every key under `resource_type`, with their key.
    pub(crate) fn listeners_for_type(&self, resource_type: &str) -> Vec<(String, Listener)> {
        self.slots
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .flat_map(|((_, key), listeners)| {
                listeners.iter().map(move |(_, l)| (key.clone(), Arc::clone(l)))
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }
}

/// Shared handle on the listener registry.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    registry: Arc<Mutex<ListenerRegistry>>,
}

impl Listeners {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ListenerRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, resource_type: &str, key: &str, listener: Listener) -> Subscription {
        let slot = (resource_type.to_string(), key.to_string());
        let id = self.lock().add(slot.clone(), listener);
        Subscription {
            registry: Arc::downgrade(&self.registry),
            slot,
            id,
        }
    }
}

/// Registration of a listener; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Mutex<ListenerRegistry>>,
    slot: Slot,
    id: u64,
}

impl Subscription {
    /// The watched resource type.
    pub fn resource_type(&self) -> &str {
        &self.slot.0
    }

    /// The watched key.
    pub fn key(&self) -> &str {
        &self.slot.1
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.slot, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("resource_type", &self.slot.0)
            .field("key", &self.slot.1)
            .field("id", &self.id)
            .finish()
    }
}
