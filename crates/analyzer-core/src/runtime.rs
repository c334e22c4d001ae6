//! The assembled orchestration core
//!
//! One broker, one store, one registry and one navigator, wired once at
//! construction and handed out by reference.

use crate::config::CoreConfig;
use crate::error::Result;
use analyzer_events::EventBroker;
use analyzer_modules::{ModuleDescriptor, ModuleRegistry};
use analyzer_navigation::{Navigator, RouteConfig};
use analyzer_state::{FilePersistence, StatePersistence, StateStore};
use analyzer_utils::Config;
use std::sync::Arc;
use tracing::{debug, info};

/// The orchestration core
///
/// # Example
///
/// ```
/// use analyzer_core::AnalyzerCore;
/// use analyzer_core::modules::{Module, ModuleDescriptor, factory_fn};
/// use analyzer_core::navigation::NavigateOptions;
///
/// struct Dashboard;
///
/// impl Module for Dashboard {}
///
/// # async fn example() -> analyzer_core::Result<()> {
/// let core = AnalyzerCore::builder().build();
/// core.register_module(ModuleDescriptor::new("dashboard", factory_fn(|_| Ok(Dashboard))))?;
///
/// assert!(core.navigator().navigate_to("dashboard", NavigateOptions::new()).await);
/// core.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AnalyzerCore {
    events: EventBroker,
    store: StateStore,
    registry: ModuleRegistry,
    navigator: Navigator,
    config: CoreConfig,
}

impl AnalyzerCore {
    /// Create a new core builder
    pub fn builder() -> CoreBuilder {
        CoreBuilder::new()
    }

    /// Get a reference to the event broker
    pub fn events(&self) -> &EventBroker {
        &self.events
    }

    /// Get a reference to the state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Get a reference to the module registry
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Get a reference to the navigator
    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Get a reference to the core configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Register a module
    pub fn register_module(&self, descriptor: ModuleDescriptor) -> Result<()> {
        Ok(self.registry.register_module(descriptor)?)
    }

    /// Register a module together with a route to it
    pub fn register_routed_module(
        &self,
        path: impl Into<String>,
        descriptor: ModuleDescriptor,
    ) -> Result<()> {
        let route = RouteConfig::new(descriptor.id.clone());
        self.registry.register_module(descriptor)?;
        self.navigator.register_route(path, route);
        Ok(())
    }

    /// Restore state from the persistence backend
    ///
    /// Returns `false` if nothing was persisted.
    pub async fn restore_state(&self) -> Result<bool> {
        let restored = self.store.load_persisted().await?;
        if restored {
            info!(
                global_keys = self.store.global_keys().len(),
                modules = self.store.module_ids().len(),
                "Persisted state restored"
            );
        }
        Ok(restored)
    }

    /// Deactivate the current module, write state and drain the broker
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(current) = self.navigator.current_module() {
            self.registry.deactivate_module(&current).await?;
        }
        if self.store.has_persistence() {
            self.store.persist_now().await?;
        }
        self.events.flush().await;
        info!("Analyzer core shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AnalyzerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerCore")
            .field("registry", &self.registry)
            .field("navigator", &self.navigator)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Builder for AnalyzerCore
pub struct CoreBuilder {
    config: CoreConfig,
    persistence: Option<Arc<dyn StatePersistence>>,
}

impl CoreBuilder {
    /// Create a new core builder
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
            persistence: None,
        }
    }

    /// Set the core configuration
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply validated settings, including file persistence if
    /// `state_file` is set
    pub fn settings(mut self, settings: &Config) -> Result<Self> {
        settings.validate()?;
        self.config = CoreConfig::from(settings);
        if let Some(path) = &settings.state_file {
            debug!(path = %path.display(), "Using file persistence");
            self.persistence = Some(Arc::new(FilePersistence::new(path)));
        }
        Ok(self)
    }

    /// Set the persistence backend
    pub fn persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Build the core
    pub fn build(self) -> AnalyzerCore {
        let events = EventBroker::with_config(self.config.broker.clone());

        let mut store = StateStore::builder()
            .config(self.config.store.clone())
            .events(events.clone());
        if let Some(persistence) = self.persistence {
            store = store.persistence(persistence);
        }
        let store = store.build();

        let registry = ModuleRegistry::new(events.clone());
        let navigator = Navigator::new(
            events.clone(),
            store.clone(),
            registry.clone(),
            self.config.navigator.clone(),
        );

        debug!("Analyzer core assembled");
        AnalyzerCore {
            events,
            store,
            registry,
            navigator,
            config: self.config,
        }
    }
}

impl Default for CoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
