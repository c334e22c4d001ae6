//! Two-tier state store
//!
//! Values live either in the global tier or in a module's private tier and
//! are plain [`serde_json::Value`]s, so change detection is structural
//! equality on the value tree. A `set` with an equal value is a no-op unless
//! forced; otherwise the store records history, notifies exact-key then
//! wildcard subscribers, publishes `state:changed` and schedules a debounced
//! persistence write.

use crate::error::{Result, StateError};
use crate::persistence::StatePersistence;
use crate::scope::{Scope, SetOptions, StateChange, WILDCARD};
use analyzer_events::{EventBroker, Unsubscribe, names};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the state store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of change records retained
    pub history_limit: usize,
    /// Quiet interval before a burst of changes is persisted
    pub persist_debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            persist_debounce: Duration::from_millis(1000),
        }
    }
}

/// Serializable copy of both tiers
///
/// This is also the persisted layout: `{ global, modules, timestamp }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Global tier
    #[serde(default)]
    pub global: Map<String, Value>,
    /// Module tiers keyed by module id
    #[serde(default)]
    pub modules: BTreeMap<String, Map<String, Value>>,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Subscriber callback
pub type StateCallback = Arc<dyn Fn(&StateChange) -> anyhow::Result<()> + Send + Sync>;

type ComputeFn = Arc<dyn Fn(&StateStore) -> anyhow::Result<Value> + Send + Sync>;

struct Subscriber {
    id: u64,
    scope: Scope,
    key: String,
    callback: StateCallback,
}

#[derive(Default)]
struct StoreData {
    global: Map<String, Value>,
    modules: BTreeMap<String, Map<String, Value>>,
    history: VecDeque<StateChange>,
    subscribers: Vec<Subscriber>,
    computed: BTreeSet<String>,
}

impl StoreData {
    fn tier(&self, scope: &Scope) -> Option<&Map<String, Value>> {
        match scope {
            Scope::Global => Some(&self.global),
            Scope::Module(id) => self.modules.get(id),
        }
    }

    fn tier_mut(&mut self, scope: &Scope) -> &mut Map<String, Value> {
        match scope {
            Scope::Global => &mut self.global,
            Scope::Module(id) => self.modules.entry(id.clone()).or_default(),
        }
    }

    fn take_tier(&mut self, scope: &Scope) -> Map<String, Value> {
        match scope {
            Scope::Global => std::mem::take(&mut self.global),
            Scope::Module(id) => self.modules.remove(id).unwrap_or_default(),
        }
    }

    fn record(&mut self, change: StateChange, limit: usize) {
        self.history.push_back(change);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Exact-key subscribers first, then wildcard, each in registration order
    fn callbacks_for(&self, scope: &Scope, key: &str) -> Vec<StateCallback> {
        let exact = self
            .subscribers
            .iter()
            .filter(|s| &s.scope == scope && s.key == key);
        let wildcard = self
            .subscribers
            .iter()
            .filter(|s| &s.scope == scope && s.key == WILDCARD);
        exact
            .chain(wildcard)
            .map(|s| Arc::clone(&s.callback))
            .collect()
    }

    fn snapshot(&self, include_computed: bool) -> StateSnapshot {
        let global = if include_computed {
            self.global.clone()
        } else {
            self.global
                .iter()
                .filter(|(key, _)| !self.computed.contains(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        StateSnapshot {
            global,
            modules: self.modules.clone(),
            timestamp: Utc::now(),
        }
    }
}

struct StoreInner {
    data: Mutex<StoreData>,
    pending_persist: Mutex<Option<JoinHandle<()>>>,
    // Changes made while no runtime could schedule a write
    unsaved: AtomicBool,
    next_id: AtomicU64,
    events: Option<EventBroker>,
    persistence: Option<Arc<dyn StatePersistence>>,
    config: StoreConfig,
}

/// Two-tier key/value store with subscriptions, computed values and
/// debounced persistence
///
/// Cloning is cheap; every clone refers to the same store.
///
/// # Example
///
/// ```
/// use analyzer_state::StateStore;
/// use serde_json::json;
///
/// let store = StateStore::new();
/// store.set_global("a", json!(10));
/// store.set_global("b", json!(20));
///
/// let _sum = store.define_computed("sum", &["a", "b"], |s| {
///     let a = s.get_global_or("a", json!(0)).as_i64().unwrap_or(0);
///     let b = s.get_global_or("b", json!(0)).as_i64().unwrap_or(0);
///     Ok(json!(a + b))
/// });
/// assert_eq!(store.get_global("sum"), Some(json!(30)));
///
/// store.set_global("a", json!(15));
/// assert_eq!(store.get_global("sum"), Some(json!(35)));
/// ```
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create a standalone store: no broker, no persistence
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new store builder
    pub fn builder() -> StateStoreBuilder {
        StateStoreBuilder::new()
    }

    /// Get a reference to the store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // =========== Global tier ===========

    /// Set a global value with default options
    ///
    /// Returns `true` if the store changed.
    pub fn set_global(&self, key: &str, value: Value) -> bool {
        self.set(Scope::Global, key, value, SetOptions::default())
    }

    /// Set a global value
    pub fn set_global_with(&self, key: &str, value: Value, options: SetOptions) -> bool {
        self.set(Scope::Global, key, value, options)
    }

    /// Read a global value
    pub fn get_global(&self, key: &str) -> Option<Value> {
        self.get(&Scope::Global, key)
    }

    /// Read a global value, falling back to `default`
    pub fn get_global_or(&self, key: &str, default: Value) -> Value {
        self.get_global(key).unwrap_or(default)
    }

    /// Whether the global tier holds `key`
    pub fn has_global(&self, key: &str) -> bool {
        self.data().global.contains_key(key)
    }

    /// Keys of the global tier, sorted
    pub fn global_keys(&self) -> Vec<String> {
        self.data().global.keys().cloned().collect()
    }

    // =========== Module tiers ===========

    /// Set a module value with default options
    pub fn set_module(&self, module_id: &str, key: &str, value: Value) -> bool {
        self.set(Scope::module(module_id), key, value, SetOptions::default())
    }

    /// Set a module value
    pub fn set_module_with(
        &self,
        module_id: &str,
        key: &str,
        value: Value,
        options: SetOptions,
    ) -> bool {
        self.set(Scope::module(module_id), key, value, options)
    }

    /// Read a module value
    pub fn get_module(&self, module_id: &str, key: &str) -> Option<Value> {
        self.get(&Scope::module(module_id), key)
    }

    /// Read a module value, falling back to `default`
    pub fn get_module_or(&self, module_id: &str, key: &str, default: Value) -> Value {
        self.get_module(module_id, key).unwrap_or(default)
    }

    /// Ids of modules that have a tier
    pub fn module_ids(&self) -> Vec<String> {
        self.data().modules.keys().cloned().collect()
    }

    // =========== Core operations ===========

    /// Read a value from any scope
    ///
    /// Values are returned by copy; mutating the result does not touch the
    /// store.
    pub fn get(&self, scope: &Scope, key: &str) -> Option<Value> {
        self.data().tier(scope).and_then(|tier| tier.get(key)).cloned()
    }

    /// Set a value in any scope
    ///
    /// Returns `false` without side effects if the value is structurally
    /// equal to the current one and `options.force` is not set.
    pub fn set(&self, scope: Scope, key: &str, value: Value, options: SetOptions) -> bool {
        let (change, callbacks) = {
            let mut data = self.data();
            let old_value = data.tier(&scope).and_then(|tier| tier.get(key)).cloned();
            if !options.force && old_value.as_ref() == Some(&value) {
                return false;
            }

            data.tier_mut(&scope).insert(key.to_string(), value.clone());
            let change = StateChange::new(scope, key, old_value, Some(value));
            data.record(change.clone(), self.inner.config.history_limit);
            let callbacks = data.callbacks_for(&change.scope, key);
            (change, callbacks)
        };

        debug!(scope = %change.scope, key, "State changed");

        Self::notify(&callbacks, &change);
        if !options.silent {
            self.publish_change(&change);
        }
        if !options.skip_persist {
            self.schedule_persist();
        }
        true
    }

    /// Subscribe to one key of a scope, or to every key with `"*"`
    pub fn subscribe<F>(&self, scope: Scope, key: impl Into<String>, callback: F) -> Unsubscribe
    where
        F: Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.data().subscribers.push(Subscriber {
            id,
            scope,
            key: key.into(),
            callback: Arc::new(callback),
        });

        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(store) = Self::upgrade(&weak) {
                store.data().subscribers.retain(|s| s.id != id);
            }
        })
    }

    /// Subscribe to a global key
    pub fn subscribe_global<F>(&self, key: impl Into<String>, callback: F) -> Unsubscribe
    where
        F: Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Scope::Global, key, callback)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.data().subscribers.len()
    }

    // =========== Computed values ===========

    /// Define a global key derived from other entries
    ///
    /// The value is computed immediately, then recomputed whenever one of
    /// `dependencies` changes. A dependency is `key` (global) or
    /// `scope:key`. Computed writes never schedule persistence, and computed
    /// keys are left out of the persisted state. A failing computation keeps
    /// the last good value.
    pub fn define_computed<F>(
        &self,
        key: impl Into<String>,
        dependencies: &[&str],
        compute: F,
    ) -> Unsubscribe
    where
        F: Fn(&StateStore) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let key = key.into();
        let compute: ComputeFn = Arc::new(compute);
        self.data().computed.insert(key.clone());
        self.recompute(&key, &compute);

        let handles: Vec<Unsubscribe> = dependencies
            .iter()
            .map(|qualified| {
                let (scope, dependency) = Scope::parse_dependency(qualified);
                let weak = Arc::downgrade(&self.inner);
                let key = key.clone();
                let compute = Arc::clone(&compute);
                self.subscribe(scope, dependency, move |_change| {
                    if let Some(store) = Self::upgrade(&weak) {
                        store.recompute(&key, &compute);
                    }
                    Ok(())
                })
            })
            .collect();

        debug!(key = %key, dependencies = ?dependencies, "Computed value defined");

        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            for handle in handles {
                handle.unsubscribe();
            }
            if let Some(store) = Self::upgrade(&weak) {
                store.data().computed.remove(&key);
            }
        })
    }

    fn recompute(&self, key: &str, compute: &ComputeFn) {
        match std::panic::catch_unwind(AssertUnwindSafe(|| compute(self))) {
            Ok(Ok(value)) => {
                self.set_global_with(key, value, SetOptions::new().skip_persist());
            }
            Ok(Err(err)) => {
                warn!(key, error = %format!("{err:#}"), "Computed value failed, keeping last value");
            }
            Err(panic) => {
                warn!(key, error = %panic_message(panic.as_ref()), "Computed value panicked, keeping last value");
            }
        }
    }

    // =========== Snapshots ===========

    /// Copy both tiers
    pub fn snapshot(&self) -> StateSnapshot {
        self.data().snapshot(true)
    }

    /// Replace both tiers from `snapshot`
    ///
    /// Every existing subscription is notified afterwards, without an
    /// equality check: exact-key subscribers get the restored value (or
    /// `None`), wildcard subscribers get one notification per restored key
    /// of their scope followed by a `None` for each key the snapshot
    /// dropped. `old_value` is always `None` on this path.
    pub fn restore(&self, snapshot: StateSnapshot) {
        self.restore_inner(snapshot, true);
    }

    fn restore_inner(&self, snapshot: StateSnapshot, persist: bool) {
        let notifications: Vec<(StateCallback, StateChange)> = {
            let mut data = self.data();
            let previous = StoreData {
                global: std::mem::replace(&mut data.global, snapshot.global),
                modules: std::mem::replace(&mut data.modules, snapshot.modules),
                ..StoreData::default()
            };

            let mut notifications = Vec::new();
            for subscriber in &data.subscribers {
                let tier = data.tier(&subscriber.scope);
                if subscriber.key == WILDCARD {
                    for (key, value) in tier.into_iter().flatten() {
                        notifications.push((
                            Arc::clone(&subscriber.callback),
                            StateChange::new(
                                subscriber.scope.clone(),
                                key.clone(),
                                None,
                                Some(value.clone()),
                            ),
                        ));
                    }
                    let dropped = previous
                        .tier(&subscriber.scope)
                        .into_iter()
                        .flatten()
                        .filter(|(key, _)| tier.is_none_or(|t| !t.contains_key(*key)));
                    for (key, _) in dropped {
                        notifications.push((
                            Arc::clone(&subscriber.callback),
                            StateChange::new(subscriber.scope.clone(), key.clone(), None, None),
                        ));
                    }
                } else {
                    let value = tier.and_then(|t| t.get(&subscriber.key)).cloned();
                    notifications.push((
                        Arc::clone(&subscriber.callback),
                        StateChange::new(
                            subscriber.scope.clone(),
                            subscriber.key.clone(),
                            None,
                            value,
                        ),
                    ));
                }
            }
            notifications
        };

        info!(notifications = notifications.len(), "State restored");

        for (callback, change) in &notifications {
            Self::invoke(callback, change);
        }

        if let Some(events) = &self.inner.events {
            events.publish(names::STATE_RESTORED, json!({}));
        }
        if persist {
            self.schedule_persist();
        }
    }

    /// Clear one module's tier
    pub fn reset_module(&self, module_id: &str) {
        self.reset(&[Scope::module(module_id)], json!({ "scope": module_id }));
    }

    /// Clear both tiers
    pub fn reset_all(&self) {
        let scopes: Vec<Scope> = {
            let data = self.data();
            std::iter::once(Scope::Global)
                .chain(data.modules.keys().cloned().map(Scope::Module))
                .collect()
        };
        self.reset(&scopes, json!({ "scope": "all" }));
    }

    fn reset(&self, scopes: &[Scope], payload: Value) {
        let notifications: Vec<(Vec<StateCallback>, StateChange)> = {
            let mut data = self.data();
            let mut notifications = Vec::new();
            for scope in scopes {
                for (key, old_value) in data.take_tier(scope) {
                    let change = StateChange::new(scope.clone(), key, Some(old_value), None);
                    data.record(change.clone(), self.inner.config.history_limit);
                    notifications.push((data.callbacks_for(scope, &change.key), change));
                }
            }
            notifications
        };

        for (callbacks, change) in &notifications {
            Self::notify(callbacks, change);
        }

        if let Some(events) = &self.inner.events {
            events.publish(names::STATE_RESET, payload);
        }
        self.schedule_persist();
    }

    // =========== History ===========

    /// The most recent change records, oldest first
    pub fn history(&self, limit: Option<usize>) -> Vec<StateChange> {
        let data = self.data();
        let skip = limit.map_or(0, |limit| data.history.len().saturating_sub(limit));
        data.history.iter().skip(skip).cloned().collect()
    }

    // =========== Persistence ===========

    /// Whether a persistence backend is attached
    pub fn has_persistence(&self) -> bool {
        self.inner.persistence.is_some()
    }

    /// Write state now, cancelling any pending debounced write
    pub async fn persist_now(&self) -> Result<()> {
        if let Some(pending) = self.pending().take() {
            pending.abort();
        }
        self.write_persisted().await
    }

    /// Restore from the persistence backend
    ///
    /// Returns `false` if there is no backend or nothing was saved.
    pub async fn load_persisted(&self) -> Result<bool> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(false);
        };
        let Some(raw) = persistence
            .load()
            .await
            .map_err(|err| StateError::persistence(&err))?
        else {
            debug!("No persisted state found");
            return Ok(false);
        };

        let snapshot: StateSnapshot = serde_json::from_str(&raw)?;
        self.restore_inner(snapshot, false);
        Ok(true)
    }

    /// Whether a change has not reached the backend yet
    ///
    /// True while a debounced write is waiting to fire, and after a change
    /// made outside a tokio runtime until the next write.
    pub fn persist_pending(&self) -> bool {
        self.inner.unsaved.load(Ordering::Acquire)
            || self.pending().as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn write_persisted(&self) -> Result<()> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(());
        };
        let unsaved = self.inner.unsaved.swap(false, Ordering::AcqRel);
        let snapshot = self.data().snapshot(false);
        let serialized = serde_json::to_string(&snapshot)?;
        if let Err(err) = persistence.save(serialized).await {
            if unsaved {
                self.inner.unsaved.store(true, Ordering::Release);
            }
            return Err(StateError::persistence(&err));
        }
        debug!(
            global_keys = snapshot.global.len(),
            modules = snapshot.modules.len(),
            "State persisted"
        );
        Ok(())
    }

    /// Cancel the pending write, if any, and schedule a new one
    fn schedule_persist(&self) {
        if self.inner.persistence.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Kept until persist_now or the next scheduled write
            self.inner.unsaved.store(true, Ordering::Release);
            warn!("No async runtime, state change not persisted yet");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.persist_debounce;

        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(store) = Self::upgrade(&weak) else {
                return;
            };
            // Detach from the pending slot so a later change cannot abort
            // a write already in progress
            drop(store.pending().take());
            if let Err(err) = store.write_persisted().await {
                error!(error = %err, "Debounced state persist failed");
            }
        }));
    }

    // =========== Internals ===========

    fn data(&self) -> MutexGuard<'_, StoreData> {
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .pending_persist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn upgrade(weak: &Weak<StoreInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn notify(callbacks: &[StateCallback], change: &StateChange) {
        for callback in callbacks {
            Self::invoke(callback, change);
        }
    }

    fn invoke(callback: &StateCallback, change: &StateChange) {
        match std::panic::catch_unwind(AssertUnwindSafe(|| callback(change))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                scope = %change.scope,
                key = %change.key,
                error = %format!("{err:#}"),
                "State subscriber failed"
            ),
            Err(panic) => warn!(
                scope = %change.scope,
                key = %change.key,
                error = %panic_message(panic.as_ref()),
                "State subscriber panicked"
            ),
        }
    }

    fn publish_change(&self, change: &StateChange) {
        if let Some(events) = &self.inner.events {
            events.publish(
                names::STATE_CHANGED,
                json!({
                    "scope": change.scope.to_string(),
                    "key": change.key,
                    "value": change.new_value,
                    "oldValue": change.old_value,
                }),
            );
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data();
        f.debug_struct("StateStore")
            .field("global_keys", &data.global.len())
            .field("modules", &data.modules.len())
            .field("subscribers", &data.subscribers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for StateStore
pub struct StateStoreBuilder {
    config: StoreConfig,
    events: Option<EventBroker>,
    persistence: Option<Arc<dyn StatePersistence>>,
}

impl StateStoreBuilder {
    /// Create a new store builder
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            events: None,
            persistence: None,
        }
    }

    /// Set the store configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish change events through `events`
    pub fn events(mut self, events: EventBroker) -> Self {
        self.events = Some(events);
        self
    }

    /// Persist through `persistence`
    pub fn persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Build the store
    pub fn build(self) -> StateStore {
        StateStore {
            inner: Arc::new(StoreInner {
                data: Mutex::new(StoreData::default()),
                pending_persist: Mutex::new(None),
                unsaved: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                events: self.events,
                persistence: self.persistence,
                config: self.config,
            }),
        }
    }
}

impl Default for StateStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}
