//! Navigation controller for stock-analyzer
//!
//! The [`Navigator`] maps route paths and module ids to guarded transitions
//! over the [`analyzer_modules::ModuleRegistry`], keeps a bounded history
//! stack for [`Navigator::back`], and mirrors the active module into the
//! state store.

pub mod error;
pub mod guard;
pub mod navigator;
pub mod route;

pub use analyzer_modules::NavigationContext;
pub use error::{NavigationError, Result};
pub use guard::{
    AfterGuard, AsyncFnBeforeGuard, BeforeGuard, FnAfterGuard, FnBeforeGuard, after_fn,
    async_before_fn, before_fn,
};
pub use navigator::{Navigator, NavigatorConfig, keys};
pub use route::{NavigateOptions, NavigationEntry, RouteConfig};
