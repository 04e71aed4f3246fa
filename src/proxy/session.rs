//! Per-engine session state shared by every command handler

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Mutable key/value state created once per proxy and handed to every handler
/// invocation in both directions.
///
/// Cloning yields another handle to the same map. Each call below is atomic,
/// but handlers dispatched from the same chunk run concurrently, so a
/// read-modify-write that spans an `.await` can interleave with another
/// handler's. Use [`Session::update`] when a change must be applied in one step.
#[derive(Debug, Clone, Default)]
pub struct Session {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        // The map has no cross-key invariant a panicking handler could break
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` against the map while holding the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().clone()
    }

    /// True when both handles refer to the same session.
    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}
