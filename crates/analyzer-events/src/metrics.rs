//! Broker counters

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Mutable counters owned by the broker state
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    events_by_name: HashMap<String, u64>,
    total_events: u64,
    error_count: u64,
    handler_invocations: u64,
    handler_time: Duration,
}

impl MetricsRecorder {
    pub(crate) fn record_event(&mut self, name: &str) {
        self.total_events += 1;
        *self.events_by_name.entry(name.to_string()).or_default() += 1;
    }

    pub(crate) fn record_handler(&mut self, elapsed: Duration, failed: bool) {
        self.handler_invocations += 1;
        self.handler_time += elapsed;
        if failed {
            self.error_count += 1;
        }
    }

    pub(crate) fn snapshot(&self, queue_depth: usize, subscriber_count: usize) -> BrokerMetrics {
        let average_handler_time_ms = if self.handler_invocations == 0 {
            0.0
        } else {
            self.handler_time.as_secs_f64() * 1000.0 / self.handler_invocations as f64
        };

        BrokerMetrics {
            total_events: self.total_events,
            events_by_name: self
                .events_by_name
                .iter()
                .map(|(name, count)| (name.clone(), *count))
                .collect(),
            error_count: self.error_count,
            handler_invocations: self.handler_invocations,
            average_handler_time_ms,
            queue_depth,
            subscriber_count,
        }
    }
}

/// Point-in-time view of the broker counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMetrics {
    /// Events dispatched since the broker was created
    pub total_events: u64,
    /// Dispatched events per name
    pub events_by_name: BTreeMap<String, u64>,
    /// Handler invocations that returned an error or panicked
    pub error_count: u64,
    /// Handler invocations overall
    pub handler_invocations: u64,
    /// Mean wall time of a handler invocation
    pub average_handler_time_ms: f64,
    /// Events waiting in the queue
    pub queue_depth: usize,
    /// Live subscriptions
    pub subscriber_count: usize,
}
