//! HuntNet node - hosts hunt sessions and keeps itself in the fleet registry.
//!
//! Usage: huntnet-node [config.json]
//!
//! Without an argument the config comes from `HUNTNET_CONFIG` (or defaults),
//! then `HUNTNET_*` variables override individual fields.
//! Features: --features redis (shared Redis store), --features metrics

use std::process::ExitCode;
use std::sync::Arc;

use huntnet::{
    init_tracing, open_store, DisabledWorlds, NodeConfig, NodeRuntime, NoopHooks, SystemClock,
    TracingConfig,
};
use tracing::{error, info};

fn load_config() -> Result<NodeConfig, huntnet::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) if path == "--help" || path == "-h" => {
            eprintln!("HuntNet node");
            eprintln!("============");
            eprintln!("Usage: huntnet-node [config.json]");
            eprintln!();
            eprintln!("Env: HUNTNET_CONFIG, HUNTNET_NODE_NAME, HUNTNET_NODE_CLASS, HUNTNET_CAPACITY,");
            eprintln!("     HUNTNET_HEARTBEAT_SECS, HUNTNET_STORE_URL, HUNTNET_LOG");
            std::process::exit(0);
        }
        Some(path) => {
            let mut config = NodeConfig::from_file(path)?;
            config.apply_env(|var| std::env::var(var).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => NodeConfig::load(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("huntnet-node: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(TracingConfig::from(&config));

    let store = match open_store(&config, Arc::new(SystemClock)) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    let node = match NodeRuntime::start(config, store, Arc::new(NoopHooks), Arc::new(DisabledWorlds)) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "failed to start node");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!(node = %node.handle().name(), "shutting down");
    node.shutdown().await;
    ExitCode::SUCCESS
}
