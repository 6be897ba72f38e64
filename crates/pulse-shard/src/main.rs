//! Shard fleet entry point
//!
//! Run with:
//! ```bash
//! cargo run -p pulse-shard
//! ```
//!
//! Without shard environment variables the process supervises the fleet;
//! with them (set by the supervisor at spawn) it runs a single shard unit.

use pulse_common::{try_init_tracing, AppConfig};
use pulse_rest::{RestClient, RestClientConfig};
use pulse_shard::supervisor::{ShardSupervisor, ShardSupervisorConfig};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    // Run in the mode the environment selects
    if let Err(e) = run().await {
        error!(error = %e, "Shard process failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    match pulse_shard::runner::shard_context_from_env()? {
        Some(context) => pulse_shard::runner::run_shard(config, context).await,
        None => supervise(config).await,
    }
}

async fn supervise(config: AppConfig) -> anyhow::Result<()> {
    info!(env = ?config.app.env, "Starting shard supervisor");

    let rest = Arc::new(RestClient::new(&RestClientConfig::from_app(&config))?);
    let supervisor_config = ShardSupervisorConfig::from_app(&config)?;
    let (supervisor, mut events) = ShardSupervisor::new(supervisor_config, rest);

    // Surface fleet transitions in the supervisor's own log
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(shard = event.shard_id, kind = ?event.kind, "Fleet event");
        }
    });

    supervisor.run().await?;
    Ok(())
}
