use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{BackendError, ManagementBackend, PolicyResponse, PolicySetting, RegisterResponse};

/// Fixed-answer backend for local runs: registers every caller with the same
/// device token and serves one policy set.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    device_token: String,
    policies: BTreeMap<String, Value>,
}

impl StaticBackend {
    pub fn new(device_token: impl Into<String>, policies: BTreeMap<String, Value>) -> Self {
        Self {
            device_token: device_token.into(),
            policies,
        }
    }
}

#[async_trait]
impl ManagementBackend for StaticBackend {
    async fn register(&self, auth_token: String) -> Result<RegisterResponse, BackendError> {
        if auth_token.is_empty() {
            return Err(BackendError::Forbidden);
        }
        Ok(RegisterResponse {
            device_token: self.device_token.clone(),
        })
    }

    async fn fetch_policy(&self, device_token: String) -> Result<PolicyResponse, BackendError> {
        if device_token != self.device_token {
            return Err(BackendError::TokenInvalid);
        }
        Ok(PolicyResponse {
            settings: self
                .policies
                .iter()
                .map(|(name, value)| PolicySetting {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        })
    }
}
