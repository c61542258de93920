use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::PolicyStore;

/// Immutable policy key/value map.
///
/// Never mutated after construction; an update builds a new snapshot and
/// replaces the old one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySnapshot {
    values: BTreeMap<String, Value>,
    /// Unix time (ms) of the fetch that produced this snapshot.
    #[serde(default)]
    fetched_at_ms: Option<u64>,
}

impl PolicySnapshot {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            fetched_at_ms: None,
        }
    }

    pub fn with_fetched_at(mut self, unix_ms: u64) -> Self {
        self.fetched_at_ms = Some(unix_ms);
        self
    }

    pub fn fetched_at_ms(&self) -> Option<u64> {
        self.fetched_at_ms
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Write every pair into `store`. Returns the number of `apply` calls.
    pub fn apply_to(&self, store: &mut dyn PolicyStore) -> usize {
        for (k, v) in &self.values {
            store.apply(k, v.clone());
        }
        self.values.len()
    }
}

impl FromIterator<(String, Value)> for PolicySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
