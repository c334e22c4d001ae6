//! Module registry
//!
//! Tracks every module through `registered -> loaded -> active -> inactive`.
//! Loading resolves dependencies depth first and fails fast on a cycle.
//! Lifecycle operations are serialized, so a factory runs exactly once per
//! load even when callers race. Hook errors are returned to the caller, the
//! lifecycle state is left untouched and `module:error` is published.

use crate::error::{LifecyclePhase, RegistryError, Result};
use crate::module::{LifecycleState, ModuleContext, ModuleDescriptor, SharedModule};
use analyzer_events::{EventBroker, names};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

struct Entry {
    descriptor: ModuleDescriptor,
    state: LifecycleState,
    instance: Option<SharedModule>,
}

struct RegistryInner {
    entries: Mutex<BTreeMap<String, Entry>>,
    // Held across factory and hook awaits
    lifecycle: tokio::sync::Mutex<()>,
    events: EventBroker,
}

/// Registry of feature modules and their lifecycle
///
/// Cloning is cheap; every clone refers to the same registry. Lifecycle
/// methods must not be called from inside a factory or lifecycle hook.
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<RegistryInner>,
}

impl ModuleRegistry {
    /// Create an empty registry publishing through `events`
    pub fn new(events: EventBroker) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(BTreeMap::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    /// The broker lifecycle events go to
    pub fn events(&self) -> &EventBroker {
        &self.inner.events
    }

    /// Register a module
    ///
    /// Dependencies are resolved at load time, so they may be registered in
    /// any order.
    pub fn register_module(&self, descriptor: ModuleDescriptor) -> Result<()> {
        let id = descriptor.id.clone();
        let dependencies = descriptor.dependencies.clone();
        {
            let mut entries = self.entries();
            if entries.contains_key(&id) {
                return Err(RegistryError::AlreadyRegistered(id));
            }
            entries.insert(
                id.clone(),
                Entry {
                    descriptor,
                    state: LifecycleState::Registered,
                    instance: None,
                },
            );
        }

        debug!(module_id = %id, dependencies = ?dependencies, "Module registered");
        self.inner.events.publish(
            names::MODULE_REGISTERED,
            json!({ "moduleId": id, "dependencies": dependencies }),
        );
        Ok(())
    }

    /// Load `id` and, first, all of its transitive dependencies
    ///
    /// Modules that already have an instance are left alone.
    pub async fn load_module(&self, id: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.load_locked(id).await
    }

    /// Activate `id`, loading it first if needed
    ///
    /// Activating an active module is a successful no-op.
    pub async fn activate_module(&self, id: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.load_locked(id).await?;

        let (state, instance) = self.entry_state(id)?;
        if state == LifecycleState::Active {
            debug!(module_id = id, "Module already active");
            return Ok(());
        }
        let Some(instance) = instance else {
            return Err(RegistryError::NotRegistered(id.to_string()));
        };

        let outcome = {
            let mut module = instance.lock().await;
            AssertUnwindSafe(module.activate()).catch_unwind().await
        };
        self.finish_hook(id, LifecyclePhase::Activate, outcome)?;

        self.set_state(id, LifecycleState::Active);
        info!(module_id = id, "Module activated");
        self.inner
            .events
            .publish(names::MODULE_ACTIVATED, json!({ "moduleId": id }));
        Ok(())
    }

    /// Deactivate `id`
    ///
    /// A module that is not active is left alone. On success every broker
    /// subscription owned by the module is removed.
    pub async fn deactivate_module(&self, id: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.deactivate_locked(id).await
    }

    /// Drop the instance of `id`, deactivating it first if active
    ///
    /// The descriptor returns to `registered`; the next load runs the
    /// factory again.
    pub async fn unload_module(&self, id: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.deactivate_locked(id).await?;

        let unloaded = {
            let mut entries = self.entries();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
            entry.state = LifecycleState::Registered;
            entry.instance.take().is_some()
        };

        if unloaded {
            info!(module_id = id, "Module unloaded");
            self.inner
                .events
                .publish(names::MODULE_UNLOADED, json!({ "moduleId": id }));
        }
        Ok(())
    }

    // =========== Queries ===========

    /// Whether `id` has an instance
    pub fn is_loaded(&self, id: &str) -> bool {
        self.lifecycle_state(id)
            .is_some_and(LifecycleState::is_loaded)
    }

    /// Whether `id` is active
    pub fn is_active(&self, id: &str) -> bool {
        self.lifecycle_state(id) == Some(LifecycleState::Active)
    }

    /// Whether `id` is registered
    pub fn is_registered(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    /// Instance of `id`, if loaded
    pub fn get_module(&self, id: &str) -> Option<SharedModule> {
        self.entries()
            .get(id)
            .and_then(|entry| entry.instance.clone())
    }

    /// Lifecycle state of `id`, if registered
    pub fn lifecycle_state(&self, id: &str) -> Option<LifecycleState> {
        self.entries().get(id).map(|entry| entry.state)
    }

    /// Registered ids, sorted
    pub fn module_ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    /// Ids of active modules, sorted
    pub fn active_modules(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|(_, entry)| entry.state == LifecycleState::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    // =========== Internals ===========

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_state(&self, id: &str) -> Result<(LifecycleState, Option<SharedModule>)> {
        self.entries()
            .get(id)
            .map(|entry| (entry.state, entry.instance.clone()))
            .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))
    }

    fn set_state(&self, id: &str, state: LifecycleState) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.state = state;
        }
    }

    /// Caller holds the lifecycle lock
    async fn load_locked(&self, id: &str) -> Result<()> {
        let order = {
            let entries = self.entries();
            resolve_order(&entries, id)?
        };

        for module_id in order {
            let factory = {
                let entries = self.entries();
                match entries.get(&module_id) {
                    Some(entry) if entry.state == LifecycleState::Registered => {
                        Arc::clone(&entry.descriptor.factory)
                    }
                    _ => continue,
                }
            };

            let context = ModuleContext::new(module_id.clone(), self.inner.events.clone());
            let instance = match AssertUnwindSafe(factory.create(context))
                .catch_unwind()
                .await
            {
                Ok(Ok(instance)) => instance,
                Ok(Err(err)) => {
                    return Err(self.lifecycle_failure(
                        &module_id,
                        LifecyclePhase::Load,
                        format!("{err:#}"),
                    ));
                }
                Err(panic) => {
                    return Err(self.lifecycle_failure(
                        &module_id,
                        LifecyclePhase::Load,
                        panic_message(panic.as_ref()),
                    ));
                }
            };

            if let Some(entry) = self.entries().get_mut(&module_id) {
                entry.instance = Some(Arc::new(tokio::sync::Mutex::new(instance)));
                entry.state = LifecycleState::Loaded;
            }
            info!(module_id = %module_id, "Module loaded");
            self.inner
                .events
                .publish(names::MODULE_LOADED, json!({ "moduleId": module_id }));
        }
        Ok(())
    }

    /// Caller holds the lifecycle lock
    async fn deactivate_locked(&self, id: &str) -> Result<()> {
        let (state, instance) = self.entry_state(id)?;
        let (LifecycleState::Active, Some(instance)) = (state, instance) else {
            debug!(module_id = id, state = %state, "Module not active, nothing to deactivate");
            return Ok(());
        };

        let outcome = {
            let mut module = instance.lock().await;
            AssertUnwindSafe(module.deactivate()).catch_unwind().await
        };
        self.finish_hook(id, LifecyclePhase::Deactivate, outcome)?;

        self.set_state(id, LifecycleState::Inactive);
        let released = self.inner.events.unsubscribe_owner(id);
        info!(module_id = id, released, "Module deactivated");
        self.inner
            .events
            .publish(names::MODULE_DEACTIVATED, json!({ "moduleId": id }));
        Ok(())
    }

    fn finish_hook(
        &self,
        id: &str,
        phase: LifecyclePhase,
        outcome: std::result::Result<anyhow::Result<()>, Box<dyn Any + Send>>,
    ) -> Result<()> {
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(self.lifecycle_failure(id, phase, format!("{err:#}"))),
            Err(panic) => Err(self.lifecycle_failure(id, phase, panic_message(panic.as_ref()))),
        }
    }

    fn lifecycle_failure(&self, id: &str, phase: LifecyclePhase, message: String) -> RegistryError {
        error!(module_id = id, phase = %phase, error = %message, "Module lifecycle failed");
        self.inner.events.publish(
            names::MODULE_ERROR,
            json!({ "moduleId": id, "phase": phase, "error": message }),
        );
        RegistryError::Lifecycle {
            module_id: id.to_string(),
            phase,
            message,
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries();
        f.debug_struct("ModuleRegistry")
            .field(
                "modules",
                &entries
                    .iter()
                    .map(|(id, entry)| (id.as_str(), entry.state))
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Dependency-first load order for `id`
fn resolve_order(entries: &BTreeMap<String, Entry>, id: &str) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut done = HashSet::new();
    let mut path = Vec::new();
    visit(entries, id, &mut path, &mut done, &mut order)?;
    Ok(order)
}

fn visit(
    entries: &BTreeMap<String, Entry>,
    id: &str,
    path: &mut Vec<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    if done.contains(id) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|p| p == id) {
        let mut chain = path[start..].to_vec();
        chain.push(id.to_string());
        return Err(RegistryError::CircularDependency { chain });
    }

    let entry = entries
        .get(id)
        .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;

    path.push(id.to_string());
    for dependency in &entry.descriptor.dependencies {
        visit(entries, dependency, path, done, order)?;
    }
    path.pop();

    done.insert(id.to_string());
    order.push(id.to_string());
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}
