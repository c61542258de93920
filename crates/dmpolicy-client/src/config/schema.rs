use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use dmpolicy_core::error::{DmPolicyError, Result};
use dmpolicy_core::policy::{PolicyDefinition, PolicyDefinitionList};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub client: ClientSection,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub ops: OpsSection,

    #[serde(default)]
    pub definitions: Vec<PolicyDefinition>,

    #[serde(default)]
    pub dev_backend: DevBackendSection,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(DmPolicyError::UnsupportedVersion);
        }
        self.client.validate()?;
        self.refresh.validate()?;
        self.ops.validate()?;
        // compile once to surface duplicates / empty names at load time
        PolicyDefinitionList::new(&self.definitions)?;
        Ok(())
    }

    pub fn definition_list(&self) -> Result<PolicyDefinitionList> {
        PolicyDefinitionList::new(&self.definitions)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Directory holding the persisted policy cache.
    pub storage_dir: String,

    /// Auth token issued to the token service at startup (dev runs).
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.trim().is_empty() {
            return Err(DmPolicyError::Config("client.storage_dir must not be empty".into()));
        }
        if matches!(&self.auth_token, Some(t) if t.is_empty()) {
            return Err(DmPolicyError::Config("client.auth_token must not be empty when set".into()));
        }
        Ok(())
    }
}

/// Refresh and retry timing for the fetch orchestrator.
///
/// Passed by value at construction; tests build their own instead of
/// mutating a running provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    /// Nominal interval between successful fetches.
    #[serde(default = "default_policy_refresh_rate_ms")]
    pub policy_refresh_rate_ms: u64,

    /// Upper bound of the random amount a refresh is pulled forward.
    #[serde(default = "default_policy_refresh_max_earlier_ms")]
    pub policy_refresh_max_earlier_ms: u64,

    /// Delay before retrying a failed register or policy request.
    #[serde(default = "default_policy_refresh_error_delay_ms")]
    pub policy_refresh_error_delay_ms: u64,

    /// Delay before retrying after the token source reported an error.
    #[serde(default = "default_token_fetch_error_delay_ms")]
    pub token_fetch_error_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            policy_refresh_rate_ms: default_policy_refresh_rate_ms(),
            policy_refresh_max_earlier_ms: default_policy_refresh_max_earlier_ms(),
            policy_refresh_error_delay_ms: default_policy_refresh_error_delay_ms(),
            token_fetch_error_delay_ms: default_token_fetch_error_delay_ms(),
        }
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<()> {
        if !(60_000..=7 * DAY_MS).contains(&self.policy_refresh_rate_ms) {
            return Err(DmPolicyError::Config(
                "refresh.policy_refresh_rate_ms must be between 60000 and 604800000".into(),
            ));
        }
        if self.policy_refresh_max_earlier_ms > self.policy_refresh_rate_ms {
            return Err(DmPolicyError::Config(
                "refresh.policy_refresh_max_earlier_ms must not exceed policy_refresh_rate_ms".into(),
            ));
        }
        if !(1_000..=DAY_MS).contains(&self.policy_refresh_error_delay_ms) {
            return Err(DmPolicyError::Config(
                "refresh.policy_refresh_error_delay_ms must be between 1000 and 86400000".into(),
            ));
        }
        if !(1_000..=DAY_MS).contains(&self.token_fetch_error_delay_ms) {
            return Err(DmPolicyError::Config(
                "refresh.token_fetch_error_delay_ms must be between 1000 and 86400000".into(),
            ));
        }
        Ok(())
    }

    pub fn refresh_rate(&self) -> Duration {
        Duration::from_millis(self.policy_refresh_rate_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.policy_refresh_error_delay_ms)
    }

    pub fn token_error_delay(&self) -> Duration {
        Duration::from_millis(self.token_fetch_error_delay_ms)
    }
}

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn default_policy_refresh_rate_ms() -> u64 {
    3 * 60 * 60 * 1000
}
fn default_policy_refresh_max_earlier_ms() -> u64 {
    20 * 60 * 1000
}
fn default_policy_refresh_error_delay_ms() -> u64 {
    3 * 1000
}
fn default_token_fetch_error_delay_ms() -> u64 {
    3 * 1000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for OpsSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|_| DmPolicyError::Config("ops.listen must be a valid SocketAddr".into()))?;
        Ok(())
    }
}

fn default_listen() -> String {
    "127.0.0.1:9090".into()
}

/// In-process backend used for local runs.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevBackendSection {
    #[serde(default = "default_device_token")]
    pub device_token: String,

    #[serde(default)]
    pub policies: BTreeMap<String, Value>,
}

impl Default for DevBackendSection {
    fn default() -> Self {
        Self {
            device_token: default_device_token(),
            policies: BTreeMap::new(),
        }
    }
}

fn default_device_token() -> String {
    "dev-device".into()
}
