//! Before and after guards

use analyzer_modules::NavigationContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Runs before a transition and may veto it
///
/// Returning `Ok(false)` cancels the transition before any module is
/// touched. An error or a panic cancels it as well.
#[async_trait]
pub trait BeforeGuard: Send + Sync {
    /// Whether the transition may proceed
    async fn allow(&self, context: &NavigationContext) -> anyhow::Result<bool>;
}

/// Runs after a successful transition; errors and panics are logged only
#[async_trait]
pub trait AfterGuard: Send + Sync {
    /// Observe the completed transition
    async fn after(&self, context: &NavigationContext) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into a [`BeforeGuard`]
pub struct FnBeforeGuard<F>(F);

#[async_trait]
impl<F> BeforeGuard for FnBeforeGuard<F>
where
    F: Fn(&NavigationContext) -> anyhow::Result<bool> + Send + Sync,
{
    async fn allow(&self, context: &NavigationContext) -> anyhow::Result<bool> {
        (self.0)(context)
    }
}

/// Adapter turning an async closure into a [`BeforeGuard`]
pub struct AsyncFnBeforeGuard<F>(F);

#[async_trait]
impl<F, Fut> BeforeGuard for AsyncFnBeforeGuard<F>
where
    F: Fn(NavigationContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn allow(&self, context: &NavigationContext) -> anyhow::Result<bool> {
        (self.0)(context.clone()).await
    }
}

/// Adapter turning a synchronous closure into an [`AfterGuard`]
pub struct FnAfterGuard<F>(F);

#[async_trait]
impl<F> AfterGuard for FnAfterGuard<F>
where
    F: Fn(&NavigationContext) -> anyhow::Result<()> + Send + Sync,
{
    async fn after(&self, context: &NavigationContext) -> anyhow::Result<()> {
        (self.0)(context)
    }
}

/// Wrap a synchronous closure as a before guard
pub fn before_fn<F>(f: F) -> Arc<dyn BeforeGuard>
where
    F: Fn(&NavigationContext) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(FnBeforeGuard(f))
}

/// Wrap an async closure as a before guard
pub fn async_before_fn<F, Fut>(f: F) -> Arc<dyn BeforeGuard>
where
    F: Fn(NavigationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(AsyncFnBeforeGuard(f))
}

/// Wrap a synchronous closure as an after guard
pub fn after_fn<F>(f: F) -> Arc<dyn AfterGuard>
where
    F: Fn(&NavigationContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnAfterGuard(f))
}
