//! Known-policy list used to decode backend settings.
//!
//! Unknown names and values of the wrong kind are dropped (with a warning)
//! rather than failing the whole response. An empty list accepts everything.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::snapshot::PolicySnapshot;
use crate::error::{DmPolicyError, Result};

/// Expected JSON kind of a policy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Boolean,
    Integer,
    String,
    List,
    Dictionary,
}

impl PolicyKind {
    pub fn matches(self, v: &Value) -> bool {
        match self {
            PolicyKind::Boolean => v.is_boolean(),
            PolicyKind::Integer => v.is_i64() || v.is_u64(),
            PolicyKind::String => v.is_string(),
            PolicyKind::List => v.is_array(),
            PolicyKind::Dictionary => v.is_object(),
        }
    }
}

/// One known policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDefinition {
    pub name: String,
    pub kind: PolicyKind,
}

/// Compiled name -> kind lookup.
#[derive(Debug, Clone, Default)]
pub struct PolicyDefinitionList {
    kinds: HashMap<String, PolicyKind>,
}

impl PolicyDefinitionList {
    /// Accept-all list.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn new(defs: &[PolicyDefinition]) -> Result<Self> {
        let mut kinds = HashMap::with_capacity(defs.len());
        for d in defs {
            if d.name.trim().is_empty() {
                return Err(DmPolicyError::Config("policy definition with empty name".into()));
            }
            if kinds.insert(d.name.clone(), d.kind).is_some() {
                return Err(DmPolicyError::Config(format!(
                    "duplicate policy definition: {}",
                    d.name
                )));
            }
        }
        Ok(Self { kinds })
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kind_of(&self, name: &str) -> Option<PolicyKind> {
        self.kinds.get(name).copied()
    }

    /// Build a snapshot from raw `(name, value)` settings.
    ///
    /// `null` values mean "not set" and are skipped.
    pub fn decode<I>(&self, settings: I) -> PolicySnapshot
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        settings
            .into_iter()
            .filter(|(name, value)| {
                if value.is_null() {
                    return false;
                }
                if self.kinds.is_empty() {
                    return true;
                }
                match self.kinds.get(name) {
                    None => {
                        tracing::warn!(policy = %name, "dropping unknown policy");
                        false
                    }
                    Some(kind) if !kind.matches(value) => {
                        tracing::warn!(policy = %name, expected = ?kind, "dropping policy with mismatched type");
                        false
                    }
                    Some(_) => true,
                }
            })
            .collect()
    }
}
