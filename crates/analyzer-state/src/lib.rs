//! Two-tier state store for stock-analyzer
//!
//! Global entries are shared by every module; each module also owns a
//! private tier. The store offers:
//!
//! - Change detection by structural equality, so equal writes are no-ops
//! - Exact-key and wildcard subscriptions
//! - Computed values that track their dependencies
//! - Snapshots with restore, and a change history
//! - Debounced persistence through a [`StatePersistence`] backend
//!
//! When built with an [`analyzer_events::EventBroker`], the store publishes
//! `state:changed`, `state:restored` and `state:reset`.

pub mod error;
pub mod persistence;
pub mod scope;
pub mod store;

pub use error::{Result, StateError};
pub use persistence::{FilePersistence, MemoryPersistence, StatePersistence};
pub use scope::{Scope, SetOptions, StateChange, WILDCARD};
pub use store::{StateCallback, StateSnapshot, StateStore, StateStoreBuilder, StoreConfig};
