//! Event broker
//!
//! An in-process publish/subscribe bus. Queued publishes are drained by a
//! cooperative task spawned on the current tokio runtime: the highest
//! priority pending event goes first, ties in enqueue order. Every handler
//! runs inside an isolation wrapper, so one failing observer never blocks
//! its siblings.
//!
//! # Example
//!
//! ```
//! use analyzer_events::{EventBroker, SubscribeOptions, handler_fn};
//! use serde_json::json;
//!
//! # async fn example() {
//! let broker = EventBroker::new();
//! let _sub = broker.subscribe(
//!     "quote:updated",
//!     handler_fn(|event| {
//!         println!("new quote: {}", event.payload);
//!         Ok(())
//!     }),
//!     SubscribeOptions::new().with_priority(10),
//! );
//!
//! broker.publish("quote:updated", json!({"symbol": "AAPL", "price": 190.1}));
//! broker.flush().await;
//! # }
//! ```

use crate::error::{EventError, Result};
use crate::event::{Event, HistoryFilter, PublishOptions, SubscribeOptions, names, pattern_matches};
use crate::handler::{ErrorObserver, EventHandler, HandlerFailure, Unsubscribe};
use crate::metrics::{BrokerMetrics, MetricsRecorder};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Configuration for the event broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Number of dispatched events retained in the history ring
    pub history_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

struct Subscription {
    id: u64,
    pattern: String,
    handler: Arc<dyn EventHandler>,
    priority: i32,
    once: bool,
    owner: Option<String>,
}

struct QueuedEvent {
    seq: u64,
    event: Event,
}

// Max-heap order: higher priority first, then lower sequence (FIFO).
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event
            .priority
            .cmp(&other.event.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

#[derive(Default)]
struct BrokerState {
    // Sorted by descending priority, then ascending id.
    subscriptions: Vec<Subscription>,
    queue: BinaryHeap<QueuedEvent>,
    draining: bool,
    drain_scheduled: bool,
    history: VecDeque<Event>,
    metrics: MetricsRecorder,
    observers: Vec<(u64, ErrorObserver)>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    idle: Notify,
    next_id: AtomicU64,
    config: BrokerConfig,
}

/// Snapshot entry taken at dispatch start
struct Target {
    id: u64,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

/// In-process publish/subscribe bus
///
/// Cloning is cheap; every clone refers to the same broker.
#[derive(Clone)]
pub struct EventBroker {
    inner: Arc<BrokerInner>,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroker {
    /// Create a broker with the default configuration
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a broker with the given configuration
    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                idle: Notify::new(),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Get a reference to the broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    // =========== Subscriptions ===========

    /// Subscribe a handler to an event name
    ///
    /// `name` may end in `*` to match every event starting with the prefix.
    /// Subscriptions are never deduplicated.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        let id = self.next_id();
        let subscription = Subscription {
            id,
            pattern: name.into(),
            handler,
            priority: options.priority,
            once: options.once,
            owner: options.owner,
        };

        debug!(
            event = %subscription.pattern,
            subscription_id = id,
            priority = subscription.priority,
            once = subscription.once,
            "Subscribed"
        );

        {
            let mut state = self.state();
            // Insert after every subscription of equal or higher priority
            let position = state
                .subscriptions
                .iter()
                .position(|existing| existing.priority < subscription.priority)
                .unwrap_or(state.subscriptions.len());
            state.subscriptions.insert(position, subscription);
        }

        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(broker) = Self::upgrade(&weak) {
                broker.remove_subscription(id);
            }
        })
    }

    /// Remove every subscription registered under exactly `name`, or all
    /// subscriptions when `name` is `None`
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, name: Option<&str>) -> usize {
        let mut state = self.state();
        let before = state.subscriptions.len();
        match name {
            Some(name) => state.subscriptions.retain(|s| s.pattern != name),
            None => state.subscriptions.clear(),
        }
        before - state.subscriptions.len()
    }

    /// Remove every subscription owned by `module_id`
    pub fn unsubscribe_owner(&self, module_id: &str) -> usize {
        let mut state = self.state();
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|s| s.owner.as_deref() != Some(module_id));
        let removed = before - state.subscriptions.len();
        if removed > 0 {
            debug!(module_id, removed, "Removed module-owned subscriptions");
        }
        removed
    }

    /// Register a broker-wide failure observer
    pub fn on_error(
        &self,
        observer: impl Fn(&HandlerFailure) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let id = self.next_id();
        self.state().observers.push((id, Arc::new(observer)));

        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(broker) = Self::upgrade(&weak) {
                broker.state().observers.retain(|(oid, _)| *oid != id);
            }
        })
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Number of live subscriptions that would receive `name`
    pub fn subscribers_for(&self, name: &str) -> usize {
        self.state()
            .subscriptions
            .iter()
            .filter(|s| pattern_matches(&s.pattern, name))
            .count()
    }

    // =========== Publishing ===========

    /// Queue an event at default priority
    ///
    /// Returns the id of the new event.
    pub fn publish(&self, name: impl Into<String>, payload: Value) -> String {
        self.publish_with(name, payload, PublishOptions::default())
    }

    /// Queue an event
    ///
    /// When called inside a tokio runtime a drain task is scheduled if none
    /// is pending. Outside a runtime the event stays queued until
    /// [`EventBroker::flush`] is awaited.
    pub fn publish_with(
        &self,
        name: impl Into<String>,
        payload: Value,
        options: PublishOptions,
    ) -> String {
        let event = Event::new(name, payload, options.priority);
        let id = event.id.clone();
        let seq = self.next_id();

        let runtime = tokio::runtime::Handle::try_current().ok();
        let spawn_on = {
            let mut state = self.state();
            state.queue.push(QueuedEvent { seq, event });
            match runtime {
                Some(handle) if !state.draining && !state.drain_scheduled => {
                    state.drain_scheduled = true;
                    Some(handle)
                }
                _ => None,
            }
        };

        if let Some(handle) = spawn_on {
            let broker = self.clone();
            handle.spawn(async move { broker.run_scheduled_drain().await });
        }

        id
    }

    /// Dispatch an event immediately on the caller's path
    ///
    /// Every handler runs, in the same order as queued dispatch. The first
    /// handler failure is returned once all handlers have run.
    pub async fn publish_sync(&self, name: impl Into<String>, payload: Value) -> Result<String> {
        self.publish_sync_with(name, payload, PublishOptions::default())
            .await
    }

    /// Dispatch an event immediately with explicit options
    pub async fn publish_sync_with(
        &self,
        name: impl Into<String>,
        payload: Value,
        options: PublishOptions,
    ) -> Result<String> {
        let event = Event::new(name, payload, options.priority);
        match self.dispatch(&event).await {
            Some(message) => Err(EventError::HandlerFailed {
                event: event.name,
                message,
            }),
            None => Ok(event.id),
        }
    }

    /// Wait until the queue is empty and no drain step is running
    ///
    /// If nothing is draining, the queue is drained on the caller's task.
    /// Must not be awaited from inside a handler.
    pub async fn flush(&self) {
        loop {
            let notified = self.inner.idle.notified();
            let claimed = {
                let mut state = self.state();
                if state.draining {
                    false
                } else if state.queue.is_empty() {
                    return;
                } else {
                    state.draining = true;
                    true
                }
            };

            if claimed {
                self.drain_loop().await;
            } else {
                notified.await;
            }
        }
    }

    // =========== Observability ===========

    /// Dispatched events matching `filter`, oldest first
    pub fn history(&self, filter: &HistoryFilter) -> Vec<Event> {
        self.state()
            .history
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect()
    }

    /// Forget all retained events
    pub fn clear_history(&self) {
        self.state().history.clear();
    }

    /// Snapshot of the broker counters
    pub fn metrics(&self) -> BrokerMetrics {
        let state = self.state();
        state
            .metrics
            .snapshot(state.queue.len(), state.subscriptions.len())
    }

    /// Number of events waiting to be dispatched
    pub fn queue_depth(&self) -> usize {
        self.state().queue.len()
    }

    // =========== Internals ===========

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn upgrade(weak: &Weak<BrokerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn remove_subscription(&self, id: u64) {
        self.state().subscriptions.retain(|s| s.id != id);
    }

    async fn run_scheduled_drain(&self) {
        let claimed = {
            let mut state = self.state();
            state.drain_scheduled = false;
            if state.draining || state.queue.is_empty() {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if claimed {
            self.drain_loop().await;
        }
    }

    /// Pop and dispatch until the queue is empty. The caller must have set
    /// `draining`.
    async fn drain_loop(&self) {
        loop {
            let next = {
                let mut state = self.state();
                let next = state.queue.pop();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };

            let Some(queued) = next else {
                self.inner.idle.notify_waiters();
                break;
            };

            // Failures were already isolated and reported
            let _ = self.dispatch(&queued.event).await;
        }
    }

    /// Deliver one occurrence to its subscribers, returning the first
    /// failure message
    async fn dispatch(&self, event: &Event) -> Option<String> {
        let targets: Vec<Target> = {
            let mut state = self.state();
            state.metrics.record_event(&event.name);
            state.history.push_back(event.clone());
            while state.history.len() > self.inner.config.history_limit {
                state.history.pop_front();
            }
            state
                .subscriptions
                .iter()
                .filter(|s| pattern_matches(&s.pattern, &event.name))
                .map(|s| Target {
                    id: s.id,
                    handler: Arc::clone(&s.handler),
                    once: s.once,
                })
                .collect()
        };

        debug!(
            event = %event.name,
            event_id = %event.id,
            handlers = targets.len(),
            "Dispatching event"
        );

        let mut first_failure = None;
        for target in targets {
            // Skip handlers removed after the snapshot; claim once-handlers
            // before running them so a reentrant dispatch cannot fire them twice
            {
                let mut state = self.state();
                let Some(position) = state.subscriptions.iter().position(|s| s.id == target.id)
                else {
                    continue;
                };
                if target.once {
                    state.subscriptions.remove(position);
                }
            }

            let started = Instant::now();
            let outcome = AssertUnwindSafe(target.handler.handle(event))
                .catch_unwind()
                .await;
            let elapsed = started.elapsed();

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            self.state()
                .metrics
                .record_handler(elapsed, failure.is_some());

            if let Some(message) = failure {
                self.report_failure(event, target.id, &message);
                first_failure.get_or_insert(message);
            }
        }

        first_failure
    }

    fn report_failure(&self, event: &Event, subscription_id: u64, message: &str) {
        let failure = HandlerFailure {
            event_name: event.name.clone(),
            event_id: event.id.clone(),
            subscription_id,
            error: message.to_string(),
        };

        let observers: Vec<ErrorObserver> = self
            .state()
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| observer(&failure))).is_err() {
                error!(event = %event.name, "Error observer panicked");
            }
        }

        // Failures of system:error handlers are not re-published
        if event.name == names::SYSTEM_ERROR {
            error!(
                subscription_id,
                error = message,
                "system:error handler failed"
            );
            return;
        }

        warn!(
            event = %event.name,
            event_id = %event.id,
            subscription_id,
            error = message,
            "Event handler failed"
        );

        let payload = serde_json::to_value(&failure).unwrap_or(Value::Null);
        self.publish(names::SYSTEM_ERROR, payload);
    }
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("EventBroker")
            .field("subscriptions", &state.subscriptions.len())
            .field("queue_depth", &state.queue.len())
            .field("draining", &state.draining)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{async_handler_fn, handler_fn};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Arc<dyn EventHandler>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &str| {
            let sink = sink.clone();
            let label = label.to_string();
            handler_fn(move |_event| {
                sink.lock().unwrap().push(label.clone());
                Ok(())
            })
        };
        (log, make)
    }

    #[tokio::test]
    async fn test_handlers_run_by_descending_priority() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        for priority in [1, 5, 3] {
            let _ = broker.subscribe(
                "quote:updated",
                make(&priority.to_string()),
                SubscribeOptions::new().with_priority(priority),
            );
        }

        broker.publish("quote:updated", json!({}));
        broker.flush().await;

        assert_eq!(*log.lock().unwrap(), vec!["5", "3", "1"]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        let _ = broker.subscribe("tick", make("first"), SubscribeOptions::new());
        let _ = broker.subscribe("tick", make("second"), SubscribeOptions::new());
        let _ = broker.subscribe("tick", make("third"), SubscribeOptions::new());

        broker.publish_sync("tick", json!(null)).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        let _ = broker.subscribe("tick", make("a"), SubscribeOptions::new());
        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| anyhow::bail!("handler exploded")),
            SubscribeOptions::new(),
        );
        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| panic!("handler panicked")),
            SubscribeOptions::new(),
        );
        let _ = broker.subscribe("tick", make("b"), SubscribeOptions::new());

        broker.publish("tick", json!(null));
        broker.flush().await;

        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(broker.metrics().error_count, 2);
    }

    #[tokio::test]
    async fn test_failure_republished_as_system_error() {
        let broker = EventBroker::new();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();

        let _ = broker.subscribe(
            names::SYSTEM_ERROR,
            handler_fn(move |event| {
                sink.lock().unwrap().push(event.payload.clone());
                Ok(())
            }),
            SubscribeOptions::new(),
        );
        let _ = broker.subscribe(
            "quote:updated",
            handler_fn(|_| anyhow::bail!("bad quote")),
            SubscribeOptions::new(),
        );

        broker.publish("quote:updated", json!({}));
        broker.flush().await;

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["eventName"], "quote:updated");
        assert_eq!(failures[0]["error"], "bad quote");
    }

    #[tokio::test]
    async fn test_system_error_handler_failure_not_amplified() {
        let broker = EventBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let _ = broker.subscribe(
            names::SYSTEM_ERROR,
            handler_fn(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                anyhow::bail!("error handler is broken too")
            }),
            SubscribeOptions::new(),
        );
        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| anyhow::bail!("boom")),
            SubscribeOptions::new(),
        );

        broker.publish("tick", json!(null));
        broker.flush().await;

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(broker.history(&HistoryFilter::named(names::SYSTEM_ERROR)).len(), 1);
    }

    #[tokio::test]
    async fn test_on_error_observer() {
        let broker = EventBroker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = broker.on_error(move |failure| {
            sink.lock().unwrap().push(failure.error.clone());
        });

        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| anyhow::bail!("first")),
            SubscribeOptions::new(),
        );
        broker.publish_sync("tick", json!(null)).await.unwrap_err();

        observer.unsubscribe();
        broker.publish_sync("tick", json!(null)).await.unwrap_err();

        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_once_handler_fires_once() {
        let broker = EventBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let _ = broker.subscribe(
            "tick",
            handler_fn(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::new().once(),
        );

        broker.publish("tick", json!(1));
        broker.publish("tick", json!(2));
        broker.flush().await;

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(broker.subscribers_for("tick"), 0);
    }

    #[tokio::test]
    async fn test_once_handler_removed_even_when_failing() {
        let broker = EventBroker::new();
        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| anyhow::bail!("nope")),
            SubscribeOptions::new().once(),
        );

        assert!(broker.publish_sync("tick", json!(null)).await.is_err());
        assert_eq!(broker.subscribers_for("tick"), 0);
        assert!(broker.publish_sync("tick", json!(null)).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_drains_highest_priority_first() {
        let broker = EventBroker::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = order.clone();
        let _ = broker.subscribe(
            "job:*",
            handler_fn(move |event| {
                sink.lock().unwrap().push(event.name.clone());
                Ok(())
            }),
            SubscribeOptions::new(),
        );

        // Queue without a runtime-driven drain racing us: hold the drain by
        // publishing from a plain thread, which has no runtime handle
        let publisher = broker.clone();
        std::thread::spawn(move || {
            publisher.publish_with("job:low", json!(null), PublishOptions::priority(-1));
            publisher.publish_with("job:first", json!(null), PublishOptions::default());
            publisher.publish_with("job:high", json!(null), PublishOptions::priority(10));
            publisher.publish_with("job:second", json!(null), PublishOptions::default());
        })
        .join()
        .unwrap();

        assert_eq!(broker.queue_depth(), 4);
        broker.flush().await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["job:high", "job:first", "job:second", "job:low"]
        );
        assert_eq!(broker.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_dispatch() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        let victim = Arc::new(Mutex::new(None::<Unsubscribe>));
        let slot = victim.clone();
        let _ = broker.subscribe(
            "tick",
            handler_fn(move |_| {
                if let Some(handle) = slot.lock().unwrap().take() {
                    handle.unsubscribe();
                }
                Ok(())
            }),
            SubscribeOptions::new().with_priority(10),
        );
        let handle = broker.subscribe("tick", make("removed"), SubscribeOptions::new());
        *victim.lock().unwrap() = Some(handle);
        let _ = broker.subscribe("tick", make("kept"), SubscribeOptions::new());

        broker.publish_sync("tick", json!(null)).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_sync_publish_reports_first_error_after_all_ran() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| anyhow::bail!("first failure")),
            SubscribeOptions::new().with_priority(2),
        );
        let _ = broker.subscribe(
            "tick",
            handler_fn(|_| anyhow::bail!("second failure")),
            SubscribeOptions::new().with_priority(1),
        );
        let _ = broker.subscribe("tick", make("last"), SubscribeOptions::new());

        let err = broker.publish_sync("tick", json!(null)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Handler for 'tick' failed: first failure"
        );
        assert_eq!(*log.lock().unwrap(), vec!["last"]);
    }

    #[tokio::test]
    async fn test_async_handlers_are_awaited_in_order() {
        let broker = EventBroker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, priority) in [("slow", 2), ("fast", 1)] {
            let sink = order.clone();
            let _ = broker.subscribe(
                "tick",
                async_handler_fn(move |_event| {
                    let sink = sink.clone();
                    async move {
                        if label == "slow" {
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                        sink.lock().unwrap().push(label);
                        Ok(())
                    }
                }),
                SubscribeOptions::new().with_priority(priority),
            );
        }

        broker.publish("tick", json!(null));
        broker.flush().await;
        assert_eq!(*order.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_pattern_and_owner_subscriptions() {
        let broker = EventBroker::new();
        let (log, make) = recorder();

        let _ = broker.subscribe(
            "module:*",
            make("pattern"),
            SubscribeOptions::new().owned_by("chart"),
        );
        let _ = broker.subscribe(
            "module:loaded",
            make("exact"),
            SubscribeOptions::new().owned_by("chart").with_priority(1),
        );
        let _ = broker.subscribe("module:loaded", make("other"), SubscribeOptions::new());

        broker.publish_sync("module:loaded", json!(null)).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["exact", "pattern", "other"]);

        assert_eq!(broker.unsubscribe_owner("chart"), 2);
        assert_eq!(broker.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let broker = EventBroker::new();
        let (_, make) = recorder();
        let _ = broker.subscribe("a", make("1"), SubscribeOptions::new());
        let _ = broker.subscribe("a", make("2"), SubscribeOptions::new());
        let _ = broker.subscribe("b", make("3"), SubscribeOptions::new());

        assert_eq!(broker.unsubscribe_all(Some("a")), 2);
        assert_eq!(broker.subscriber_count(), 1);
        assert_eq!(broker.unsubscribe_all(None), 1);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_history_is_capped_and_filterable() {
        let broker = EventBroker::with_config(BrokerConfig { history_limit: 3 });
        for i in 0..5 {
            broker
                .publish_sync(format!("tick:{}", i % 2), json!(i))
                .await
                .unwrap();
        }

        let all = broker.history(&HistoryFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].payload, json!(2));
        assert_eq!(all[2].payload, json!(4));

        let odd = broker.history(&HistoryFilter::named("tick:1"));
        assert_eq!(odd.len(), 1);
        assert_eq!(odd[0].payload, json!(3));

        let future = chrono::Utc::now() + chrono::Duration::seconds(60);
        assert!(broker.history(&HistoryFilter::default().since(future)).is_empty());

        broker.clear_history();
        assert!(broker.history(&HistoryFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn test_metrics_count_events_by_name() {
        let broker = EventBroker::new();
        let (_, make) = recorder();
        let _ = broker.subscribe("tick", make("x"), SubscribeOptions::new());

        broker.publish("tick", json!(null));
        broker.publish("tock", json!(null));
        broker.publish("tick", json!(null));
        broker.flush().await;

        let metrics = broker.metrics();
        assert_eq!(metrics.total_events, 3);
        assert_eq!(metrics.events_by_name.get("tick"), Some(&2));
        assert_eq!(metrics.handler_invocations, 2);
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_reentrant_publish_from_handler() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        let inner = broker.clone();

        let _ = broker.subscribe(
            "outer",
            handler_fn(move |_| {
                inner.publish("inner", json!(null));
                Ok(())
            }),
            SubscribeOptions::new(),
        );
        let _ = broker.subscribe("inner", make("inner"), SubscribeOptions::new());

        broker.publish("outer", json!(null));
        broker.flush().await;
        assert_eq!(*log.lock().unwrap(), vec!["inner"]);
    }

    #[test]
    fn test_publish_without_runtime_stays_queued() {
        let broker = EventBroker::new();
        broker.publish("tick", json!(null));
        assert_eq!(broker.queue_depth(), 1);

        tokio_test::block_on(broker.flush());
        assert_eq!(broker.queue_depth(), 0);
        assert_eq!(broker.metrics().total_events, 1);
    }
}
