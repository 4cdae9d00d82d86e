//! In-memory shared state map, lost on restart

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Set a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write().insert(key.into(), value)
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of every entry
    pub fn all(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
