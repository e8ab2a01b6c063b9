//! Progress Registry
//!
//! Tracks the completion percentage of every in-flight upload, keyed by
//! target name. Entries exist only while an upload is running; a finished
//! or failed upload is indistinguishable from one that never started.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared map of target name to percent complete (0-100)
#[derive(Clone, Default)]
pub struct ProgressRegistry {
    inner: Arc<RwLock<HashMap<String, f64>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new upload; returns false if one is already running for `name`
    pub fn try_begin(&self, name: &str, pct: f64) -> bool {
        let mut entries = self.inner.write();
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(name.to_string(), pct);
        true
    }

    pub fn set(&self, name: &str, pct: f64) {
        self.inner.write().insert(name.to_string(), pct);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.inner.read().get(name).copied()
    }

    pub fn remove(&self, name: &str) -> Option<f64> {
        self.inner.write().remove(name)
    }

    /// Copy of all in-flight uploads
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
