//! Orchestration core for stock-analyzer
//!
//! [`AnalyzerCore`] owns the four components and wires them once:
//!
//! - [`EventBroker`]: publish/subscribe with priority dispatch
//! - [`StateStore`]: global and per-module state, fed back into the broker
//! - [`ModuleRegistry`]: dependency-ordered module lifecycle
//! - [`Navigator`]: guarded transitions between modules
//!
//! The component crates are re-exported so hosts depend on this crate only.

pub mod config;
pub mod error;
pub mod runtime;

pub use analyzer_events as events;
pub use analyzer_modules as modules;
pub use analyzer_navigation as navigation;
pub use analyzer_state as state;
pub use analyzer_utils as utils;

pub use analyzer_events::EventBroker;
pub use analyzer_modules::ModuleRegistry;
pub use analyzer_navigation::Navigator;
pub use analyzer_state::StateStore;
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use runtime::{AnalyzerCore, CoreBuilder};
