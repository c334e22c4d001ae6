//! Routes, navigation options and history entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Target of a registered route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Module activated by the route
    pub module_id: String,
    /// Default parameters, overridden by call parameters
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Free-form metadata (title, icon, ...)
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl RouteConfig {
    /// Route to `module_id`
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            ..Self::default()
        }
    }

    /// Add a default parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Options for a navigation request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigateOptions {
    /// Parameters handed to the target
    pub params: Map<String, Value>,
    /// Query values handed to the target
    pub query: Map<String, Value>,
    /// Do not push a history entry
    pub skip_history: bool,
}

impl NavigateOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a query value
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Leave the history stack untouched
    pub fn skip_history(mut self) -> Self {
        self.skip_history = true;
        self
    }
}

/// One successful navigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEntry {
    /// Module navigated to
    pub module_id: String,
    /// When the navigation completed
    pub timestamp: DateTime<Utc>,
    /// Parameters used
    pub params: Map<String, Value>,
    /// Query values used
    pub query: Map<String, Value>,
}

impl NavigationEntry {
    pub(crate) fn new(
        module_id: impl Into<String>,
        params: Map<String, Value>,
        query: Map<String, Value>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            timestamp: Utc::now(),
            params,
            query,
        }
    }

    /// Options replaying this entry without pushing a new one
    pub(crate) fn replay_options(&self) -> NavigateOptions {
        NavigateOptions {
            params: self.params.clone(),
            query: self.query.clone(),
            skip_history: true,
        }
    }
}
