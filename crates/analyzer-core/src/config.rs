//! Typed configuration for the assembled core

use analyzer_events::BrokerConfig;
use analyzer_navigation::NavigatorConfig;
use analyzer_state::StoreConfig;
use analyzer_utils::Config;
use std::time::Duration;

/// Per-component configuration
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Event broker settings
    pub broker: BrokerConfig,
    /// State store settings
    pub store: StoreConfig,
    /// Navigator settings
    pub navigator: NavigatorConfig,
}

impl From<&Config> for CoreConfig {
    fn from(config: &Config) -> Self {
        Self {
            broker: BrokerConfig {
                history_limit: config.event_history_limit,
            },
            store: StoreConfig {
                history_limit: config.state_history_limit,
                persist_debounce: Duration::from_millis(config.persist_debounce_ms),
            },
            navigator: NavigatorConfig {
                history_limit: config.navigation_history_limit,
            },
        }
    }
}
