use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

/// Scoped key/value storage.
///
/// Every [`crate::Event`] carries one for per-dispatch data; an
/// [`crate::Emitter`] built with the `data_store` option carries one of its
/// own as instance-level scratch space.
#[derive(Debug, Default)]
pub struct DataStore {
    data: Mutex<HashMap<String, Value>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`, or `default` when absent.
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.lock().get(key).cloned().unwrap_or(default)
    }

    /// Returns the value stored under `key` when present.
    pub fn try_get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    pub fn unset(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}
