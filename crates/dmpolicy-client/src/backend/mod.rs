//! Management backend seam.
//!
//! The orchestrator owns no transport details: it hands a backend the auth
//! token or the registration credential and gets back a response or a
//! [`BackendError`]. Futures run on worker threads, so implementations must be
//! `Send + Sync`.

mod static_backend;

use async_trait::async_trait;
use serde_json::Value;

pub use dmpolicy_core::error::BackendError;
pub use static_backend::StaticBackend;

/// Successful register response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Durable registration credential used for policy requests.
    pub device_token: String,
}

/// One policy setting as delivered by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySetting {
    pub name: String,
    pub value: Value,
}

/// Successful policy response. Always the complete policy set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyResponse {
    pub settings: Vec<PolicySetting>,
}

impl PolicyResponse {
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        self.settings.into_iter().map(|s| (s.name, s.value))
    }
}

/// Register/fetch backend. Each call resolves exactly once.
#[async_trait]
pub trait ManagementBackend: Send + Sync {
    async fn register(&self, auth_token: String) -> Result<RegisterResponse, BackendError>;
    async fn fetch_policy(&self, device_token: String) -> Result<PolicyResponse, BackendError>;
}
