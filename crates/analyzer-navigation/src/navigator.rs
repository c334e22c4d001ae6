//! Navigation controller
//!
//! A transition runs in a fixed order:
//!
//! 1. Before guards, in registration order. A `false`, an error or a panic
//!    cancels the transition with no side effects, `navigation:start`
//!    included.
//! 2. Deactivate the current module.
//! 3. Load and activate the target, then call its `on_navigate` hook.
//! 4. Push a history entry unless skipped.
//! 5. After guards, best effort. Their failures and those of `on_navigate`
//!    are logged only.
//! 6. Update `currentModule` and `navigation` in the state store and
//!    publish `navigation:complete` and `navigation:<moduleId>`.
//!
//! If the target fails to activate, one recovery attempt re-activates the
//! previous module without touching history, and the request reports
//! failure. Only one transition runs at a time; requests made meanwhile are
//! rejected.

use crate::error::{NavigationError, Result};
use crate::guard::{AfterGuard, BeforeGuard};
use crate::route::{NavigateOptions, NavigationEntry, RouteConfig};
use analyzer_events::{EventBroker, Unsubscribe, names};
use analyzer_modules::{ModuleRegistry, NavigationContext};
use analyzer_state::StateStore;
use chrono::Utc;
use futures::FutureExt;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Global state keys written after every successful transition
pub mod keys {
    /// Id of the active module
    pub const CURRENT_MODULE: &str = "currentModule";
    /// Details of the last transition
    pub const NAVIGATION: &str = "navigation";
}

/// Configuration for the navigator
#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// Maximum depth of the history stack
    pub history_limit: usize,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self { history_limit: 50 }
    }
}

#[derive(Default)]
struct NavigatorState {
    routes: BTreeMap<String, RouteConfig>,
    history: VecDeque<NavigationEntry>,
    current: Option<String>,
    before: Vec<(u64, Arc<dyn BeforeGuard>)>,
    after: Vec<(u64, Arc<dyn AfterGuard>)>,
}

struct NavigatorInner {
    state: Mutex<NavigatorState>,
    transitioning: AtomicBool,
    next_id: AtomicU64,
    events: EventBroker,
    store: StateStore,
    registry: ModuleRegistry,
    config: NavigatorConfig,
}

/// Clears the in-progress flag when the transition ends, however it ends
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A failed transition and the module to fall back to, if any
struct Aborted {
    error: NavigationError,
    recover_to: Option<String>,
}

impl From<NavigationError> for Aborted {
    fn from(error: NavigationError) -> Self {
        Self {
            error,
            recover_to: None,
        }
    }
}

/// Routing layer over the module registry
///
/// Cloning is cheap; every clone refers to the same navigator.
#[derive(Clone)]
pub struct Navigator {
    inner: Arc<NavigatorInner>,
}

impl Navigator {
    /// Create a navigator wired to the shared broker, store and registry
    pub fn new(
        events: EventBroker,
        store: StateStore,
        registry: ModuleRegistry,
        config: NavigatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(NavigatorInner {
                state: Mutex::new(NavigatorState::default()),
                transitioning: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                events,
                store,
                registry,
                config,
            }),
        }
    }

    /// Get a reference to the navigator configuration
    pub fn config(&self) -> &NavigatorConfig {
        &self.inner.config
    }

    // =========== Routes ===========

    /// Register a route, returning the one it replaces
    pub fn register_route(&self, path: impl Into<String>, route: RouteConfig) -> Option<RouteConfig> {
        let path = path.into();
        debug!(path = %path, module_id = %route.module_id, "Route registered");
        self.state().routes.insert(path, route)
    }

    /// Route registered under `path`
    pub fn route(&self, path: &str) -> Option<RouteConfig> {
        self.state().routes.get(path).cloned()
    }

    /// All routes, sorted by path
    pub fn routes(&self) -> Vec<(String, RouteConfig)> {
        self.state()
            .routes
            .iter()
            .map(|(path, route)| (path.clone(), route.clone()))
            .collect()
    }

    // =========== Guards ===========

    /// Register a guard run before every transition
    pub fn before_each(&self, guard: Arc<dyn BeforeGuard>) -> Unsubscribe {
        let id = self.next_id();
        self.state().before.push((id, guard));
        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.state().before.retain(|(gid, _)| *gid != id);
            }
        })
    }

    /// Register a guard run after every successful transition
    pub fn after_each(&self, guard: Arc<dyn AfterGuard>) -> Unsubscribe {
        let id = self.next_id();
        self.state().after.push((id, guard));
        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.state().after.retain(|(gid, _)| *gid != id);
            }
        })
    }

    // =========== Navigation ===========

    /// Navigate to `module_id`
    ///
    /// Returns `true` if the target is now active. Failures are logged and
    /// published as `navigation:cancelled` or `navigation:error`.
    pub async fn navigate_to(&self, module_id: &str, options: NavigateOptions) -> bool {
        self.try_navigate_to(module_id, options).await.is_ok()
    }

    /// Navigate to `module_id`, reporting why it did not happen
    pub async fn try_navigate_to(&self, module_id: &str, options: NavigateOptions) -> Result<()> {
        let _in_progress = self.begin(module_id)?;
        self.navigate(module_id, options).await
    }

    /// Navigate through a registered route
    ///
    /// Route parameters are merged beneath the call parameters.
    pub async fn navigate_path(&self, path: &str, options: NavigateOptions) -> Result<bool> {
        let route = self
            .route(path)
            .ok_or_else(|| NavigationError::RouteNotFound(path.to_string()))?;

        let NavigateOptions {
            params: call_params,
            query,
            skip_history,
        } = options;
        let mut params = route.params;
        params.extend(call_params);

        Ok(self
            .navigate_to(
                &route.module_id,
                NavigateOptions {
                    params,
                    query,
                    skip_history,
                },
            )
            .await)
    }

    /// Go back to the previous history entry
    ///
    /// Replays the entry's params and query. The current entry is popped
    /// only if the transition succeeds.
    pub async fn back(&self) -> bool {
        self.try_back().await.is_ok()
    }

    /// Go back, reporting why it did not happen
    pub async fn try_back(&self) -> Result<()> {
        let _in_progress = self.begin("back")?;
        let target = {
            let state = self.state();
            state
                .history
                .len()
                .checked_sub(2)
                .and_then(|index| state.history.get(index).cloned())
        };
        let Some(target) = target else {
            return Err(NavigationError::NoHistory);
        };

        self.navigate(&target.module_id, target.replay_options())
            .await?;
        self.state().history.pop_back();
        Ok(())
    }

    /// Re-run the transition to the current module
    pub async fn reload(&self) -> bool {
        self.try_reload().await.is_ok()
    }

    /// Reload, reporting why it did not happen
    pub async fn try_reload(&self) -> Result<()> {
        let _in_progress = self.begin("reload")?;
        let Some(current) = self.current_module() else {
            return Err(NavigationError::NoCurrentModule);
        };
        let options = self.replay_options_for(&current);
        self.navigate(&current, options).await
    }

    // =========== Queries ===========

    /// Id of the active module
    pub fn current_module(&self) -> Option<String> {
        self.state().current.clone()
    }

    /// Top of the history stack
    pub fn current_entry(&self) -> Option<NavigationEntry> {
        self.state().history.back().cloned()
    }

    /// History stack, oldest first
    pub fn history(&self) -> Vec<NavigationEntry> {
        self.state().history.iter().cloned().collect()
    }

    /// Whether [`Navigator::back`] has an entry to go to
    pub fn can_go_back(&self) -> bool {
        self.state().history.len() > 1
    }

    /// Whether a transition is in progress
    pub fn is_navigating(&self) -> bool {
        self.inner.transitioning.load(Ordering::Acquire)
    }

    // =========== Internals ===========

    fn state(&self) -> MutexGuard<'_, NavigatorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn begin(&self, requested: &str) -> Result<InProgress<'_>> {
        match self.inner.transitioning.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(InProgress(&self.inner.transitioning)),
            Err(_) => {
                warn!(requested, "Navigation rejected, a transition is in progress");
                Err(NavigationError::Busy {
                    requested: requested.to_string(),
                })
            }
        }
    }

    fn replay_options_for(&self, module_id: &str) -> NavigateOptions {
        self.state()
            .history
            .back()
            .filter(|entry| entry.module_id == module_id)
            .map_or_else(
                || NavigateOptions::new().skip_history(),
                NavigationEntry::replay_options,
            )
    }

    async fn navigate(&self, to: &str, options: NavigateOptions) -> Result<()> {
        let Err(aborted) = self.transition(to, options, true).await else {
            return Ok(());
        };
        if let Some(previous) = aborted.recover_to {
            self.recover(&previous).await;
        }
        Err(aborted.error)
    }

    /// Single attempt to bring back the module active before a failed
    /// transition; never recovers again
    async fn recover(&self, previous: &str) {
        warn!(module_id = previous, "Attempting recovery to previous module");
        let options = self.replay_options_for(previous).skip_history();
        match self.transition(previous, options, false).await {
            Ok(()) => info!(module_id = previous, "Recovered previous module"),
            Err(aborted) => {
                error!(module_id = previous, error = %aborted.error, "Recovery failed");
            }
        }
    }

    async fn transition(
        &self,
        to: &str,
        options: NavigateOptions,
        run_guards: bool,
    ) -> std::result::Result<(), Aborted> {
        let from = self.current_module();
        let context = NavigationContext {
            from: from.clone(),
            to: to.to_string(),
            params: options.params,
            query: options.query,
        };
        let payload = transition_payload(&context);

        if !self.inner.registry.is_registered(to) {
            let error = NavigationError::UnknownModule(to.to_string());
            self.publish_error(&context, &error);
            return Err(error.into());
        }

        if run_guards && !self.run_before_guards(&context).await {
            info!(from = ?from, to, "Navigation cancelled by guard");
            self.inner
                .events
                .publish(names::NAVIGATION_CANCELLED, payload);
            return Err(NavigationError::Cancelled { to: to.to_string() }.into());
        }

        debug!(from = ?from, to, "Navigation started");
        self.inner
            .events
            .publish(names::NAVIGATION_START, payload.clone());

        if let Some(previous) = &from {
            if let Err(source) = self.inner.registry.deactivate_module(previous).await {
                // The previous module is still active
                let error = NavigationError::Transition {
                    to: to.to_string(),
                    source,
                };
                self.publish_error(&context, &error);
                return Err(error.into());
            }
            self.state().current = None;
        }

        if let Err(source) = self.inner.registry.activate_module(to).await {
            let error = NavigationError::Transition {
                to: to.to_string(),
                source,
            };
            self.publish_error(&context, &error);
            return Err(Aborted {
                error,
                recover_to: from.filter(|_| run_guards),
            });
        }

        self.call_on_navigate(&context).await;

        {
            let mut state = self.state();
            state.current = Some(to.to_string());
            if !options.skip_history {
                state.history.push_back(NavigationEntry::new(
                    to,
                    context.params.clone(),
                    context.query.clone(),
                ));
                while state.history.len() > self.inner.config.history_limit {
                    state.history.pop_front();
                }
            }
        }

        self.run_after_guards(&context).await;

        self.inner
            .store
            .set_global(keys::CURRENT_MODULE, json!(to));
        let mut navigation = payload.clone();
        navigation["timestamp"] = json!(Utc::now());
        self.inner.store.set_global(keys::NAVIGATION, navigation);

        info!(from = ?from, to, "Navigation complete");
        self.inner
            .events
            .publish(names::NAVIGATION_COMPLETE, payload.clone());
        self.inner.events.publish(names::navigation_to(to), payload);
        Ok(())
    }

    async fn run_before_guards(&self, context: &NavigationContext) -> bool {
        let guards: Vec<Arc<dyn BeforeGuard>> = self
            .state()
            .before
            .iter()
            .map(|(_, guard)| Arc::clone(guard))
            .collect();

        for (index, guard) in guards.iter().enumerate() {
            let outcome = AssertUnwindSafe(guard.allow(context)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(true)) => continue,
                Ok(Ok(false)) => {
                    debug!(guard = index, to = %context.to, "Guard vetoed navigation");
                    return false;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                guard = index,
                to = %context.to,
                error = %error,
                "Guard failed, cancelling navigation"
            );
            return false;
        }
        true
    }

    async fn run_after_guards(&self, context: &NavigationContext) {
        let guards: Vec<Arc<dyn AfterGuard>> = self
            .state()
            .after
            .iter()
            .map(|(_, guard)| Arc::clone(guard))
            .collect();

        for guard in guards {
            let outcome = AssertUnwindSafe(guard.after(context)).catch_unwind().await;
            if let Some(error) = hook_error(outcome) {
                warn!(to = %context.to, error = %error, "After guard failed");
            }
        }
    }

    async fn call_on_navigate(&self, context: &NavigationContext) {
        let Some(instance) = self.inner.registry.get_module(&context.to) else {
            return;
        };
        let outcome = {
            let mut module = instance.lock().await;
            AssertUnwindSafe(module.on_navigate(context))
                .catch_unwind()
                .await
        };
        if let Some(error) = hook_error(outcome) {
            warn!(module_id = %context.to, error = %error, "on_navigate hook failed");
        }
    }

    fn publish_error(&self, context: &NavigationContext, error: &NavigationError) {
        error!(from = ?context.from, to = %context.to, error = %error, "Navigation failed");
        self.inner.events.publish(
            names::NAVIGATION_ERROR,
            json!({
                "from": context.from,
                "to": context.to,
                "error": error.to_string(),
            }),
        );
    }
}

impl std::fmt::Debug for Navigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Navigator")
            .field("current", &state.current)
            .field("history", &state.history.len())
            .field("routes", &state.routes.len())
            .finish_non_exhaustive()
    }
}

/// Failure text of a hook run under `catch_unwind`, if it failed
fn hook_error(
    outcome: std::result::Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(panic) => Some(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

fn transition_payload(context: &NavigationContext) -> Value {
    json!({
        "from": context.from,
        "to": context.to,
        "params": context.params,
        "query": context.query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{after_fn, async_before_fn, before_fn};
    use analyzer_events::{HistoryFilter, SubscribeOptions, handler_fn};
    use analyzer_modules::{Module, ModuleDescriptor, factory_fn};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Notify;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Screen {
        id: String,
        log: Log,
        failing: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl Module for Screen {
        async fn activate(&mut self) -> anyhow::Result<()> {
            if self.failing.lock().unwrap().contains(&self.id) {
                anyhow::bail!("{} unavailable", self.id);
            }
            self.log.lock().unwrap().push(format!("activate:{}", self.id));
            Ok(())
        }

        async fn deactivate(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("deactivate:{}", self.id));
            Ok(())
        }

        async fn on_navigate(&mut self, context: &NavigationContext) -> anyhow::Result<()> {
            let params: Vec<String> = context
                .params
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            self.log
                .lock()
                .unwrap()
                .push(format!("navigate:{}[{}]", self.id, params.join(",")));
            Ok(())
        }
    }

    struct Fixture {
        navigator: Navigator,
        registry: ModuleRegistry,
        store: StateStore,
        events: EventBroker,
        log: Log,
        failing: Arc<Mutex<HashSet<String>>>,
    }

    impl Fixture {
        fn new(ids: &[&str]) -> Self {
            Self::with_config(ids, NavigatorConfig::default())
        }

        fn with_config(ids: &[&str], config: NavigatorConfig) -> Self {
            let events = EventBroker::new();
            let store = StateStore::builder().events(events.clone()).build();
            let registry = ModuleRegistry::new(events.clone());
            let log: Log = Arc::default();
            let failing: Arc<Mutex<HashSet<String>>> = Arc::default();

            for id in ids {
                let log = log.clone();
                let failing = failing.clone();
                registry
                    .register_module(ModuleDescriptor::new(
                        *id,
                        factory_fn(move |ctx| {
                            Ok(Screen {
                                id: ctx.module_id().to_string(),
                                log: log.clone(),
                                failing: failing.clone(),
                            })
                        }),
                    ))
                    .unwrap();
            }

            let navigator =
                Navigator::new(events.clone(), store.clone(), registry.clone(), config);
            Self {
                navigator,
                registry,
                store,
                events,
                log,
                failing,
            }
        }

        fn take_log(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock().unwrap())
        }

        fn history_ids(&self) -> Vec<String> {
            self.navigator
                .history()
                .into_iter()
                .map(|entry| entry.module_id)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_navigate_runs_lifecycle_in_order() {
        let f = Fixture::new(&["dashboard", "chart"]);

        assert!(f.navigator.navigate_to("dashboard", NavigateOptions::new()).await);
        assert!(
            f.navigator
                .navigate_to("chart", NavigateOptions::new().with_param("symbol", "AAPL"))
                .await
        );

        assert_eq!(
            f.take_log(),
            vec![
                "activate:dashboard",
                "navigate:dashboard[]",
                "deactivate:dashboard",
                "activate:chart",
                "navigate:chart[symbol=\"AAPL\"]",
            ]
        );
        assert_eq!(f.navigator.current_module().as_deref(), Some("chart"));
        assert_eq!(f.history_ids(), vec!["dashboard", "chart"]);
        assert!(f.registry.is_active("chart"));
        assert!(!f.registry.is_active("dashboard"));
        assert_eq!(f.store.get_global(keys::CURRENT_MODULE), Some(json!("chart")));
        assert_eq!(
            f.store.get_global(keys::NAVIGATION).unwrap()["from"],
            json!("dashboard")
        );
    }

    #[tokio::test]
    async fn test_events_published() {
        let f = Fixture::new(&["dashboard"]);
        let seen: Log = Arc::default();
        let sink = seen.clone();
        let _sub = f.events.subscribe(
            "navigation:*",
            handler_fn(move |event| {
                sink.lock().unwrap().push(event.name.clone());
                Ok(())
            }),
            SubscribeOptions::new(),
        );

        assert!(f.navigator.navigate_to("dashboard", NavigateOptions::new()).await);
        f.events.flush().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                names::NAVIGATION_START.to_string(),
                names::NAVIGATION_COMPLETE.to_string(),
                names::navigation_to("dashboard"),
            ]
        );
    }

    #[tokio::test]
    async fn test_before_guard_veto_has_no_side_effects() {
        let f = Fixture::new(&["dashboard", "admin"]);
        assert!(f.navigator.navigate_to("dashboard", NavigateOptions::new()).await);
        f.take_log();

        let _guard = f.navigator.before_each(before_fn(|ctx| Ok(ctx.to != "admin")));

        let err = f
            .navigator
            .try_navigate_to("admin", NavigateOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::Cancelled { .. }));
        assert_eq!(f.navigator.current_module().as_deref(), Some("dashboard"));
        assert!(f.take_log().is_empty());
        assert!(f.registry.is_active("dashboard"));
        assert!(!f.registry.is_loaded("admin"));

        f.events.flush().await;
        assert_eq!(
            f.events
                .history(&HistoryFilter::named(names::NAVIGATION_CANCELLED))
                .len(),
            1
        );
        // Only the accepted navigation to dashboard started
        assert_eq!(
            f.events
                .history(&HistoryFilter::named(names::NAVIGATION_START))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_async_guard_and_guard_errors_veto() {
        let f = Fixture::new(&["dashboard", "chart"]);
        let deny = f.navigator.before_each(async_before_fn(|ctx: NavigationContext| async move {
            tokio::task::yield_now().await;
            Ok(ctx.to != "chart")
        }));

        assert!(!f.navigator.navigate_to("chart", NavigateOptions::new()).await);
        deny.unsubscribe();

        let broken = f
            .navigator
            .before_each(before_fn(|_| anyhow::bail!("session expired")));
        assert!(!f.navigator.navigate_to("chart", NavigateOptions::new()).await);
        broken.unsubscribe();

        assert!(f.navigator.navigate_to("chart", NavigateOptions::new()).await);
    }

    #[tokio::test]
    async fn test_panicking_before_guard_vetoes() {
        let f = Fixture::new(&["dashboard"]);
        let _guard = f
            .navigator
            .before_each(before_fn(|_| -> anyhow::Result<bool> { panic!("guard blew up") }));

        let outcome = tokio::spawn({
            let navigator = f.navigator.clone();
            async move { navigator.navigate_to("dashboard", NavigateOptions::new()).await }
        })
        .await;
        assert!(matches!(outcome, Ok(false)));
        assert!(!f.navigator.is_navigating());
        assert!(f.navigator.current_module().is_none());
        assert!(!f.registry.is_loaded("dashboard"));
    }

    struct Fragile;

    #[async_trait]
    impl Module for Fragile {
        async fn on_navigate(&mut self, _context: &NavigationContext) -> anyhow::Result<()> {
            panic!("render failed")
        }
    }

    #[tokio::test]
    async fn test_panicking_after_guard_and_hook_are_logged_only() {
        let f = Fixture::new(&["dashboard"]);
        f.registry
            .register_module(ModuleDescriptor::new("fragile", factory_fn(|_| Ok(Fragile))))
            .unwrap();
        let _after = f
            .navigator
            .after_each(after_fn(|_| -> anyhow::Result<()> { panic!("audit sink down") }));

        assert!(f.navigator.navigate_to("fragile", NavigateOptions::new()).await);
        assert_eq!(f.navigator.current_module().as_deref(), Some("fragile"));
        assert!(f.registry.is_active("fragile"));
        assert_eq!(f.store.get_global(keys::CURRENT_MODULE), Some(json!("fragile")));

        f.events.flush().await;
        assert_eq!(
            f.events
                .history(&HistoryFilter::named(names::NAVIGATION_COMPLETE))
                .len(),
            1
        );

        // The module lock was released after the panic
        assert!(f.navigator.navigate_to("dashboard", NavigateOptions::new()).await);
        assert!(!f.registry.is_active("fragile"));
    }

    #[tokio::test]
    async fn test_guards_run_in_registration_order() {
        let f = Fixture::new(&["dashboard"]);
        let order: Log = Arc::default();
        for name in ["first", "second"] {
            let order = order.clone();
            let _guard = f.navigator.before_each(before_fn(move |_| {
                order.lock().unwrap().push(name.to_string());
                Ok(true)
            }));
        }
        let sink = order.clone();
        let _after = f.navigator.after_each(after_fn(move |ctx| {
            sink.lock().unwrap().push(format!("after:{}", ctx.to));
            anyhow::bail!("after guards are best effort")
        }));

        assert!(f.navigator.navigate_to("dashboard", NavigateOptions::new()).await);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first", "second", "after:dashboard"]
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let f = Fixture::with_config(
            &["a", "b", "c", "d", "e"],
            NavigatorConfig { history_limit: 3 },
        );
        for id in ["a", "b", "c", "d", "e"] {
            assert!(f.navigator.navigate_to(id, NavigateOptions::new()).await);
        }

        assert_eq!(f.history_ids(), vec!["c", "d", "e"]);
        assert_eq!(
            f.navigator.current_entry().map(|entry| entry.module_id).as_deref(),
            Some("e")
        );
    }

    #[tokio::test]
    async fn test_back_replays_previous_entry() {
        let f = Fixture::new(&["dashboard", "chart", "news"]);
        assert!(!f.navigator.back().await);

        f.navigator.navigate_to("dashboard", NavigateOptions::new()).await;
        f.navigator
            .navigate_to("chart", NavigateOptions::new().with_param("symbol", "MSFT"))
            .await;
        f.navigator.navigate_to("news", NavigateOptions::new()).await;
        f.take_log();

        assert!(f.navigator.back().await);
        assert_eq!(f.navigator.current_module().as_deref(), Some("chart"));
        assert_eq!(f.history_ids(), vec!["dashboard", "chart"]);
        assert_eq!(
            f.take_log(),
            vec![
                "deactivate:news",
                "activate:chart",
                "navigate:chart[symbol=\"MSFT\"]",
            ]
        );

        assert!(f.navigator.back().await);
        assert_eq!(f.history_ids(), vec!["dashboard"]);
        assert!(!f.navigator.can_go_back());
        assert!(matches!(
            f.navigator.try_back().await,
            Err(NavigationError::NoHistory)
        ));
    }

    #[tokio::test]
    async fn test_reload_reactivates_current() {
        let f = Fixture::new(&["chart"]);
        assert!(!f.navigator.reload().await);

        f.navigator
            .navigate_to("chart", NavigateOptions::new().with_param("range", "1y"))
            .await;
        f.take_log();

        assert!(f.navigator.reload().await);
        assert_eq!(
            f.take_log(),
            vec![
                "deactivate:chart",
                "activate:chart",
                "navigate:chart[range=\"1y\"]",
            ]
        );
        assert_eq!(f.navigator.history().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_activation_recovers_previous_module() {
        let f = Fixture::new(&["dashboard", "chart"]);
        f.navigator.navigate_to("dashboard", NavigateOptions::new()).await;
        f.failing.lock().unwrap().insert("chart".to_string());
        f.take_log();

        let err = f
            .navigator
            .try_navigate_to("chart", NavigateOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::Transition { .. }));

        assert_eq!(
            f.take_log(),
            vec![
                "deactivate:dashboard",
                "activate:dashboard",
                "navigate:dashboard[]",
            ]
        );
        assert_eq!(f.navigator.current_module().as_deref(), Some("dashboard"));
        assert!(f.registry.is_active("dashboard"));
        assert_eq!(f.history_ids(), vec!["dashboard"]);
        assert!(!f.navigator.is_navigating());

        f.events.flush().await;
        assert_eq!(
            f.events
                .history(&HistoryFilter::named(names::NAVIGATION_ERROR))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_recovery_reports_once() {
        let f = Fixture::new(&["dashboard", "chart"]);
        f.navigator.navigate_to("dashboard", NavigateOptions::new()).await;
        f.failing
            .lock()
            .unwrap()
            .extend(["dashboard".to_string(), "chart".to_string()]);

        assert!(!f.navigator.navigate_to("chart", NavigateOptions::new()).await);
        assert_eq!(f.navigator.current_module(), None);
        assert!(f.registry.active_modules().is_empty());

        f.events.flush().await;
        assert_eq!(
            f.events
                .history(&HistoryFilter::named(names::NAVIGATION_ERROR))
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_unknown_module_is_rejected_without_side_effects() {
        let f = Fixture::new(&["dashboard"]);
        f.navigator.navigate_to("dashboard", NavigateOptions::new()).await;
        f.take_log();

        let err = f
            .navigator
            .try_navigate_to("missing", NavigateOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::UnknownModule(_)));
        assert!(f.take_log().is_empty());
        assert!(f.registry.is_active("dashboard"));
    }

    #[tokio::test]
    async fn test_navigate_path_merges_route_params() {
        let f = Fixture::new(&["chart"]);
        f.navigator.register_route(
            "/chart",
            RouteConfig::new("chart")
                .with_param("range", "1y")
                .with_param("symbol", "SPY"),
        );

        let navigated = f
            .navigator
            .navigate_path("/chart", NavigateOptions::new().with_param("symbol", "NVDA"))
            .await
            .unwrap();
        assert!(navigated);
        assert_eq!(
            f.take_log(),
            vec!["activate:chart", "navigate:chart[range=\"1y\",symbol=\"NVDA\"]"]
        );

        let err = f
            .navigator
            .navigate_path("/nowhere", NavigateOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::RouteNotFound(path) if path == "/nowhere"));
        assert_eq!(f.navigator.routes().len(), 1);
    }

    struct Gate(Arc<Notify>);

    #[async_trait]
    impl Module for Gate {
        async fn activate(&mut self) -> anyhow::Result<()> {
            self.0.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_navigation_rejected() {
        let f = Fixture::new(&["dashboard"]);
        let gate = Arc::new(Notify::new());
        let release = gate.clone();
        f.registry
            .register_module(ModuleDescriptor::new(
                "slow",
                factory_fn(move |_| Ok(Gate(gate.clone()))),
            ))
            .unwrap();

        let navigator = f.navigator.clone();
        let pending = tokio::spawn(async move {
            navigator.navigate_to("slow", NavigateOptions::new()).await
        });
        while !f.navigator.is_navigating() {
            tokio::task::yield_now().await;
        }

        let err = f
            .navigator
            .try_navigate_to("dashboard", NavigateOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::Busy { .. }));

        release.notify_one();
        assert!(pending.await.unwrap());
        assert_eq!(f.navigator.current_module().as_deref(), Some("slow"));
        assert!(!f.navigator.is_navigating());
    }
}
