//! Event broker for stock-analyzer
//!
//! This crate is the leaf of the orchestration core. Feature modules, the
//! state store, the module registry and the navigation controller all talk
//! to each other through one [`EventBroker`] instead of holding direct
//! references.
//!
//! - Queued publishes are dispatched highest priority first, FIFO among equals
//! - Handlers of one occurrence run by descending subscriber priority,
//!   registration order among equals
//! - A failing handler is isolated, counted and re-published as `system:error`
//! - A capped history of dispatched events and a set of counters are kept for
//!   observers

pub mod broker;
pub mod error;
pub mod event;
pub mod handler;
pub mod metrics;

pub use broker::{BrokerConfig, EventBroker};
pub use error::{EventError, Result};
pub use event::{Event, HistoryFilter, PublishOptions, SubscribeOptions, names};
pub use handler::{
    AsyncFnHandler, ErrorObserver, EventHandler, FnHandler, HandlerFailure, Unsubscribe,
    async_handler_fn, handler_fn,
};
pub use metrics::BrokerMetrics;
