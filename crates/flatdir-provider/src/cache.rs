//! Session cache: one view per user key for the lifetime of a host operation.
//!
//! Looking the same user up twice within an operation must yield the same
//! view, otherwise two units of work would stage competing copies of one
//! record. The cache is never shared between operations and never notices
//! changes made to the store behind its back.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Key to view map scoped to one operation.
pub struct SessionCache<V> {
    entries: Mutex<HashMap<String, Arc<V>>>,
}

impl<V> SessionCache<V> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Cached view for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.lock().get(key).cloned()
    }

    /// Cached view for `key`, or build one with `factory` and cache it.
    ///
    /// `factory` runs without the cache lock held and may report absence,
    /// in which case nothing is cached. If two callers race on the same key
    /// the first view stored wins and both get it.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Option<Arc<V>>
    where
        F: FnOnce() -> Option<V>,
    {
        if let Some(view) = self.get(key) {
            return Some(view);
        }
        let built = Arc::new(factory()?);
        let mut entries = self.entries.lock();
        Some(Arc::clone(entries.entry(key.to_string()).or_insert(built)))
    }

    /// Cache `view` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &str, view: Arc<V>) {
        self.entries.lock().insert(key.to_string(), view);
    }

    /// Forget the view for `key`.
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        self.entries.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every cached view.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<V> Default for SessionCache<V> {
    fn default() -> Self { Self::new() }
}
