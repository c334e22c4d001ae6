//! Scopes, change records and set options

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Subscription key matching every key of a scope
pub const WILDCARD: &str = "*";

const GLOBAL: &str = "global";

/// A state tier: the process-wide global tier or one module's private tier
///
/// Serialized as a plain string; `"global"` is reserved for the global tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    /// Process-wide tier
    Global,
    /// Private tier of the named module
    Module(String),
}

impl Scope {
    /// Scope of the given module
    pub fn module(module_id: impl Into<String>) -> Self {
        Self::Module(module_id.into())
    }

    /// Parse a computed-value dependency of the form `scope:key`
    ///
    /// Without a `:` the dependency is a global key. The split happens at
    /// the first `:`, so `global:a:b` names the global key `a:b`.
    pub fn parse_dependency(qualified: &str) -> (Self, String) {
        match qualified.split_once(':') {
            Some((scope, key)) => (Self::from(scope.to_string()), key.to_string()),
            None => (Self::Global, qualified.to_string()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str(GLOBAL),
            Self::Module(id) => f.write_str(id),
        }
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        if value == GLOBAL {
            Self::Global
        } else {
            Self::Module(value)
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// One change to a state entry
///
/// Delivered to subscribers and appended to the change history. `value` is
/// `None` when the entry was removed; `old_value` is `None` when the entry
/// did not exist, and on snapshot restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    /// When the change happened
    pub timestamp: DateTime<Utc>,
    /// Tier of the entry
    pub scope: Scope,
    /// Entry key
    pub key: String,
    /// Value before the change
    pub old_value: Option<Value>,
    /// Value after the change
    pub new_value: Option<Value>,
}

impl StateChange {
    pub(crate) fn new(
        scope: Scope,
        key: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            scope,
            key: key.into(),
            old_value,
            new_value,
        }
    }
}

/// Options for a state `set`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Store and notify even if the value is unchanged
    pub force: bool,
    /// Do not publish a `state:changed` event
    pub silent: bool,
    /// Do not schedule a persistence write
    pub skip_persist: bool,
}

impl SetOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypass the equality check
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Suppress the broker event
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Suppress persistence
    pub fn skip_persist(mut self) -> Self {
        self.skip_persist = true;
        self
    }
}
