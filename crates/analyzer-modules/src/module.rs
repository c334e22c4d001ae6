//! Module trait, factory seam and the context handed to factories

use analyzer_events::{EventBroker, EventHandler, SubscribeOptions, Unsubscribe};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Core trait that all feature modules implement
///
/// Every hook is optional. Hooks are awaited one at a time; the registry
/// never runs two hooks of the same instance concurrently.
#[async_trait]
pub trait Module: Send + Sync {
    /// Called on `loaded -> active` and `inactive -> active`
    async fn activate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on `active -> inactive`
    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the module became the navigation target
    async fn on_navigate(&mut self, context: &NavigationContext) -> anyhow::Result<()> {
        let _ = context;
        Ok(())
    }
}

/// Shared handle to a module instance
pub type SharedModule = Arc<tokio::sync::Mutex<Box<dyn Module>>>;

/// Transition details handed to [`Module::on_navigate`] and to guards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationContext {
    /// Module active before the transition
    pub from: Option<String>,
    /// Target module
    pub to: String,
    /// Route and call parameters
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Query values
    #[serde(default)]
    pub query: Map<String, Value>,
}

/// What a factory gets to build an instance
///
/// Subscriptions made through [`ModuleContext::subscribe`] are owned by the
/// module and dropped in bulk when it is deactivated.
#[derive(Clone)]
pub struct ModuleContext {
    module_id: String,
    events: EventBroker,
}

impl ModuleContext {
    pub(crate) fn new(module_id: impl Into<String>, events: EventBroker) -> Self {
        Self {
            module_id: module_id.into(),
            events,
        }
    }

    /// Id of the module being built
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The shared broker
    pub fn events(&self) -> &EventBroker {
        &self.events
    }

    /// Subscribe on behalf of the module
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        self.events
            .subscribe(name, handler, options.owned_by(self.module_id.clone()))
    }

    /// Publish on behalf of the module
    pub fn publish(&self, name: impl Into<String>, payload: Value) -> String {
        self.events.publish(name, payload)
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module_id", &self.module_id)
            .finish_non_exhaustive()
    }
}

/// Builds module instances
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    /// Create a fresh instance
    async fn create(&self, context: ModuleContext) -> anyhow::Result<Box<dyn Module>>;
}

/// Adapter turning a closure into a [`ModuleFactory`]
pub struct FnFactory<F>(F);

#[async_trait]
impl<F, M> ModuleFactory for FnFactory<F>
where
    F: Fn(ModuleContext) -> anyhow::Result<M> + Send + Sync,
    M: Module + 'static,
{
    async fn create(&self, context: ModuleContext) -> anyhow::Result<Box<dyn Module>> {
        let module = (self.0)(context)?;
        Ok(Box::new(module))
    }
}

/// Wrap a closure as a shared factory
pub fn factory_fn<F, M>(f: F) -> Arc<dyn ModuleFactory>
where
    F: Fn(ModuleContext) -> anyhow::Result<M> + Send + Sync + 'static,
    M: Module + 'static,
{
    Arc::new(FnFactory(f))
}

/// Lifecycle state of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Known to the registry, no instance yet
    Registered,
    /// Instance built, never activated
    Loaded,
    /// Activation hook succeeded
    Active,
    /// Deactivated after having been active
    Inactive,
}

impl LifecycleState {
    /// Whether an instance exists
    pub fn is_loaded(self) -> bool {
        !matches!(self, Self::Registered)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registered => "registered",
            Self::Loaded => "loaded",
            Self::Active => "active",
            Self::Inactive => "inactive",
        })
    }
}

/// Registration record for one module
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// Unique module id
    pub id: String,
    /// Ids that must be loaded first
    pub dependencies: Vec<String>,
    /// Builds the instance
    pub factory: Arc<dyn ModuleFactory>,
}

impl ModuleDescriptor {
    /// Descriptor without dependencies
    pub fn new(id: impl Into<String>, factory: Arc<dyn ModuleFactory>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            factory,
        }
    }

    /// Add dependencies
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
