//! Demo feature modules

use analyzer_core::AnalyzerCore;
use analyzer_core::modules::{Module, ModuleContext, ModuleDescriptor, NavigationContext, factory_fn};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// A feature module that announces its lifecycle on the broker
pub struct DemoModule {
    context: ModuleContext,
}

#[async_trait]
impl Module for DemoModule {
    async fn activate(&mut self) -> anyhow::Result<()> {
        info!(module_id = self.context.module_id(), "Demo module activated");
        Ok(())
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        info!(module_id = self.context.module_id(), "Demo module deactivated");
        Ok(())
    }

    async fn on_navigate(&mut self, context: &NavigationContext) -> anyhow::Result<()> {
        self.context.publish(
            format!("{}:viewed", self.context.module_id()),
            json!({ "from": context.from, "params": context.params }),
        );
        Ok(())
    }
}

/// `(route, module id, dependencies)` of every demo module
pub const DEMO_MODULES: &[(&str, &str, &[&str])] = &[
    ("/", "dashboard", &[]),
    ("/watchlist", "watchlist", &[]),
    ("/market-data", "market-data", &[]),
    ("/portfolio", "portfolio", &["market-data"]),
];

/// Register the demo modules and their routes
pub fn register(core: &AnalyzerCore) -> analyzer_core::Result<()> {
    for (path, id, dependencies) in DEMO_MODULES {
        let descriptor = ModuleDescriptor::new(
            *id,
            factory_fn(|context| Ok(DemoModule { context })),
        )
        .depends_on(dependencies.iter().copied());
        core.register_routed_module(*path, descriptor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_core::events::{HistoryFilter, names};
    use analyzer_core::navigation::NavigateOptions;

    #[tokio::test]
    async fn test_demo_modules_navigate() {
        let core = AnalyzerCore::builder().build();
        register(&core).unwrap();
        assert_eq!(core.navigator().routes().len(), DEMO_MODULES.len());

        assert!(core.navigator().navigate_path("/portfolio", NavigateOptions::new()).await.unwrap());
        assert!(core.registry().is_loaded("market-data"));

        core.events().flush().await;
        assert_eq!(
            core.events()
                .history(&HistoryFilter::named("portfolio:viewed"))
                .len(),
            1
        );
        assert_eq!(
            core.events()
                .history(&HistoryFilter::named(names::MODULE_LOADED))
                .len(),
            2
        );
    }
}
