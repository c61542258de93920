use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Sink for effective policy values.
pub trait PolicyStore {
    /// Called once per key present in the current snapshot.
    fn apply(&mut self, key: &str, value: Value);
}

/// Plain map store. Counts `apply` calls so callers can tell "no policy"
/// from "policy applied".
#[derive(Debug, Clone, Default)]
pub struct MapStore {
    map: BTreeMap<String, Value>,
    applied: usize,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total `apply` calls received.
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.map
    }
}

impl PolicyStore for MapStore {
    fn apply(&mut self, key: &str, value: Value) {
        self.applied += 1;
        self.map.insert(key.to_string(), value);
    }
}

impl PolicyStore for BTreeMap<String, Value> {
    fn apply(&mut self, key: &str, value: Value) {
        self.insert(key.to_string(), value);
    }
}

impl PolicyStore for HashMap<String, Value> {
    fn apply(&mut self, key: &str, value: Value) {
        self.insert(key.to_string(), value);
    }
}
