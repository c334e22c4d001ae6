//! Module registry for stock-analyzer
//!
//! Feature modules implement [`Module`] and are registered through a
//! [`ModuleDescriptor`] naming their dependencies and a [`ModuleFactory`].
//! The [`ModuleRegistry`] builds instances on demand, dependencies first,
//! and drives the `registered -> loaded -> active -> inactive` lifecycle.
//!
//! # Example
//!
//! ```
//! use analyzer_events::EventBroker;
//! use analyzer_modules::{Module, ModuleDescriptor, ModuleRegistry, factory_fn};
//!
//! struct Dashboard;
//!
//! impl Module for Dashboard {}
//!
//! # async fn example() -> analyzer_modules::Result<()> {
//! let registry = ModuleRegistry::new(EventBroker::new());
//! registry.register_module(ModuleDescriptor::new("dashboard", factory_fn(|_| Ok(Dashboard))))?;
//! registry.activate_module("dashboard").await?;
//! assert!(registry.is_active("dashboard"));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod module;
pub mod registry;

pub use error::{LifecyclePhase, RegistryError, Result};
pub use module::{
    FnFactory, LifecycleState, Module, ModuleContext, ModuleDescriptor, ModuleFactory,
    NavigationContext, SharedModule, factory_fn,
};
pub use registry::ModuleRegistry;
