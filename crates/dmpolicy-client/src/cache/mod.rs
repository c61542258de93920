//! Persistent cache seam.
//!
//! `load` runs once, synchronously, when the provider is built so cached
//! policy is servable before any network activity. `store` is
//! fire-and-forget; implementations do their I/O off the owning context.

mod file;

use serde::{Deserialize, Serialize};

use dmpolicy_core::policy::PolicySnapshot;

pub use file::FileCache;

/// Everything the client persists across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedState {
    /// Registration credential; `None` until the first successful register.
    #[serde(default)]
    pub device_token: Option<String>,
    /// Last successfully fetched policy.
    #[serde(default)]
    pub snapshot: Option<PolicySnapshot>,
}

pub trait PolicyCache: Send + Sync {
    fn load(&self) -> Option<CachedState>;
    fn store(&self, state: CachedState);
}
