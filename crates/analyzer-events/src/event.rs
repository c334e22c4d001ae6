//! Event records and the options that accompany publish/subscribe calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event names emitted by the orchestration core
pub mod names {
    /// Re-published handler failure (payload: `HandlerFailure`)
    pub const SYSTEM_ERROR: &str = "system:error";

    /// A module descriptor was added to the registry
    pub const MODULE_REGISTERED: &str = "module:registered";
    /// A module's factory ran and produced an instance
    pub const MODULE_LOADED: &str = "module:loaded";
    /// A module became active
    pub const MODULE_ACTIVATED: &str = "module:activated";
    /// A module became inactive
    pub const MODULE_DEACTIVATED: &str = "module:deactivated";
    /// A module's instance was dropped
    pub const MODULE_UNLOADED: &str = "module:unloaded";
    /// A factory or lifecycle hook failed
    pub const MODULE_ERROR: &str = "module:error";

    /// A state entry changed
    pub const STATE_CHANGED: &str = "state:changed";
    /// Both state tiers were replaced from a snapshot
    pub const STATE_RESTORED: &str = "state:restored";
    /// A module tier, or the whole store, was cleared
    pub const STATE_RESET: &str = "state:reset";

    /// A navigation request passed its before guards
    pub const NAVIGATION_START: &str = "navigation:start";
    /// A navigation finished successfully
    pub const NAVIGATION_COMPLETE: &str = "navigation:complete";
    /// A before guard vetoed a navigation
    pub const NAVIGATION_CANCELLED: &str = "navigation:cancelled";
    /// A navigation failed during deactivation or activation
    pub const NAVIGATION_ERROR: &str = "navigation:error";

    /// Module-specific navigation event name, `navigation:<module_id>`
    pub fn navigation_to(module_id: &str) -> String {
        format!("navigation:{module_id}")
    }
}

/// An immutable event occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Process-unique id assigned at publish time
    pub id: String,
    /// Event name, for example `module:activated`
    pub name: String,
    /// Opaque payload
    pub payload: Value,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// Dispatch priority among queued events; higher runs first
    pub priority: i32,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp
    pub fn new(name: impl Into<String>, payload: Value, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            timestamp: Utc::now(),
            priority,
        }
    }
}

/// Options for queued publishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Higher values are dispatched first among pending events
    pub priority: i32,
}

impl PublishOptions {
    /// Options with the given priority
    pub fn priority(priority: i32) -> Self {
        Self { priority }
    }
}

/// Options for [`EventBroker::subscribe`](crate::EventBroker::subscribe)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Handlers with higher priority run first for the same event
    pub priority: i32,
    /// Remove the subscription after its first invocation
    pub once: bool,
    /// Module that owns the subscription, for bulk removal on deactivation
    pub owner: Option<String>,
}

impl SubscribeOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Fire at most once
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Attribute the subscription to a module
    pub fn owned_by(mut self, module_id: impl Into<String>) -> Self {
        self.owner = Some(module_id.into());
        self
    }
}

/// Filter for [`EventBroker::history`](crate::EventBroker::history)
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Only events with this exact name
    pub name: Option<String>,
    /// Only events published at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    /// Filter by event name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            since: None,
        }
    }

    /// Restrict to events at or after `since`
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        self.name.as_deref().is_none_or(|name| event.name == name)
            && self.since.is_none_or(|since| event.timestamp >= since)
    }
}

/// Whether a subscription name covers an event name
///
/// A name ending in `*` is a prefix pattern (`module:*`); anything else
/// must match exactly.
pub(crate) fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => event_name.starts_with(prefix),
        None => pattern == event_name,
    }
}
