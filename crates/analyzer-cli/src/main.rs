//! Command-line driver for the stock-analyzer orchestration core

mod demo;
mod output;

use analyzer_core::AnalyzerCore;
use analyzer_core::navigation::NavigateOptions;
use analyzer_core::utils::{Config, LogFormat, init_tracing_with};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "analyzer-cli")]
#[command(about = "Drive the stock-analyzer module core from the command line", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Modules to navigate to, in order
    #[arg(short, long, num_args = 1..)]
    navigate: Vec<String>,

    /// Go back once after the navigations
    #[arg(short, long)]
    back: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides()?;

    init_tracing_with(if args.json_logs {
        LogFormat::Json
    } else {
        config.log_format
    });

    info!("Starting analyzer-cli");

    let core = AnalyzerCore::builder().settings(&config)?.build();
    if core.restore_state().await? {
        info!("Resumed from saved state");
    }
    demo::register(&core)?;

    for module_id in &args.navigate {
        if !core
            .navigator()
            .navigate_to(module_id, NavigateOptions::new())
            .await
        {
            warn!(module_id = %module_id, "Navigation failed");
        }
    }

    if args.back && !core.navigator().back().await {
        warn!("Nothing to go back to");
    }

    core.events().flush().await;

    match core.navigator().current_module() {
        Some(current) => println!("Current module: {current}"),
        None => println!("No module active. Available: {}", core.registry().module_ids().join(", ")),
    }
    println!("{}", output::history_table(&core.navigator().history()));
    println!("{}", output::metrics_table(&core.events().metrics()));

    core.shutdown().await.context("Shutdown failed")?;
    Ok(())
}
