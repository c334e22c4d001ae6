//! Handler trait, closure adapters and the unsubscribe handle

use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Trait for event subscribers
///
/// Handlers may be synchronous or asynchronous; the broker awaits each one
/// in turn. A returned error (or a panic) is isolated to this handler and
/// never stops delivery to its siblings.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event occurrence
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Adapter turning an async closure into an [`EventHandler`]
///
/// The closure receives an owned clone of the event so the returned future
/// can be `'static`.
pub struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for AsyncFnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap a synchronous closure as a shared handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap an async closure as a shared handler
pub fn async_handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(AsyncFnHandler(f))
}

/// Details of a handler failure, delivered to error observers and carried
/// as the payload of `system:error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    /// Name of the event whose handler failed
    pub event_name: String,
    /// Id of the failing event occurrence
    pub event_id: String,
    /// Id of the failing subscription
    pub subscription_id: u64,
    /// Error or panic message
    pub error: String,
}

/// Broker-wide failure observer registered through `on_error`
pub type ErrorObserver = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// Handle returned by every registration in the core
///
/// Calling [`Unsubscribe::unsubscribe`] removes the registration. Dropping
/// the handle without calling it leaves the registration in place.
#[must_use = "dropping an Unsubscribe handle keeps the registration alive"]
pub struct Unsubscribe {
    action: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    /// Create a handle that runs `action` when unsubscribed
    pub fn new(action: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// A handle that does nothing
    pub fn noop() -> Self {
        Self { action: None }
    }

    /// Remove the registration
    pub fn unsubscribe(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.action.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sync_adapter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |event| {
            assert_eq!(event.name, "tick");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        handler.handle(&Event::new("tick", json!(1), 0)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_adapter_propagates_error() {
        let handler = async_handler_fn(|event: Event| async move {
            tokio::task::yield_now().await;
            anyhow::bail!("cannot handle {}", event.name)
        });

        let err = handler
            .handle(&Event::new("tick", json!(null), 0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot handle tick");
    }

    #[test]
    fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Unsubscribe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        Unsubscribe::noop().unsubscribe();
    }
}
