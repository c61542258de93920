//! Shared state for the ops HTTP surface.
//!
//! The provider itself is bound to its owning context; the HTTP side only
//! sees the effective policy published into an `EffectivePolicy` by a change
//! observer, plus the metrics registry.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use dmpolicy_core::policy::{PolicySnapshot, PolicyStore};

use crate::config::ClientConfig;
use crate::obs::ClientMetrics;

/// Thread-safe copy of the last provided policy.
#[derive(Clone, Default)]
pub struct EffectivePolicy {
    map: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl EffectivePolicy {
    /// Replace the published policy with `snapshot` (full replacement).
    pub fn publish(&self, snapshot: &PolicySnapshot) {
        let mut fresh: BTreeMap<String, Value> = BTreeMap::new();
        snapshot.apply_to(&mut fresh);
        // Poisoned lock means a panicking writer; keep serving the old value.
        if let Ok(mut g) = self.map.write() {
            *g = fresh;
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.map.read().map(|g| g.clone()).unwrap_or_default()
    }
}

impl PolicyStore for EffectivePolicy {
    fn apply(&mut self, key: &str, value: Value) {
        if let Ok(mut g) = self.map.write() {
            g.insert(key.to_string(), value);
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    listen: String,
    policy: EffectivePolicy,
    metrics: Arc<ClientMetrics>,
}

impl AppState {
    pub fn new(cfg: &ClientConfig, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                listen: cfg.ops.listen.clone(),
                policy: EffectivePolicy::default(),
                metrics,
            }),
        }
    }

    pub fn listen(&self) -> &str {
        &self.inner.listen
    }

    pub fn policy(&self) -> EffectivePolicy {
        self.inner.policy.clone()
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    pub fn set_draining(&self) {
        self.inner.metrics.set_draining();
    }
}
