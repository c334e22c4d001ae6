//! Table rendering

use analyzer_core::events::BrokerMetrics;
use analyzer_core::navigation::NavigationEntry;
use comfy_table::{Cell, Table};

/// Create a table with headers
pub fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_header(headers.iter().map(|h| Cell::new(*h)));
    table
}

/// Navigation history, oldest first
pub fn history_table(entries: &[NavigationEntry]) -> Table {
    let mut table = create_table(&["#", "Module", "Params", "Query", "Time"]);
    for (index, entry) in entries.iter().enumerate() {
        table.add_row(vec![
            (index + 1).to_string(),
            entry.module_id.clone(),
            serde_json::Value::Object(entry.params.clone()).to_string(),
            serde_json::Value::Object(entry.query.clone()).to_string(),
            entry.timestamp.format("%H:%M:%S%.3f").to_string(),
        ]);
    }
    table
}

/// Broker counters, one row per event name followed by the totals
pub fn metrics_table(metrics: &BrokerMetrics) -> Table {
    let mut table = create_table(&["Event", "Count"]);
    for (name, count) in &metrics.events_by_name {
        table.add_row(vec![name.clone(), count.to_string()]);
    }
    table.add_row(vec!["total".to_string(), metrics.total_events.to_string()]);
    table.add_row(vec!["handler errors".to_string(), metrics.error_count.to_string()]);
    table.add_row(vec![
        "avg handler time (ms)".to_string(),
        format!("{:.3}", metrics.average_handler_time_ms),
    ]);
    table.add_row(vec![
        "subscribers".to_string(),
        metrics.subscriber_count.to_string(),
    ]);
    table
}
