//! Shard child-mode runner
//!
//! When the shard environment is present, the process runs one gateway
//! session engine and reports its lifecycle to the supervisor as JSON
//! lines on stdout.

use crate::messages::UnitMessage;
use crate::unit::{ENV_GATEWAY_URL, ENV_SHARD_COUNT, ENV_SHARD_ID};
use anyhow::Context;
use pulse_cache::{RedisBus, RedisBusConfig, RedisEntityCache, RedisPool};
use pulse_common::AppConfig;
use pulse_gateway::{SessionEngine, SessionEngineConfig};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Shard parameters read from the environment at child startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardContext {
    pub shard_id: u16,
    pub shard_count: u16,
    pub gateway_url: String,
}

/// Read the shard context, if this process was spawned as a unit
pub fn shard_context_from_env() -> anyhow::Result<Option<ShardContext>> {
    let Ok(shard_id) = std::env::var(ENV_SHARD_ID) else {
        return Ok(None);
    };

    let shard_id = shard_id
        .parse()
        .with_context(|| format!("invalid {ENV_SHARD_ID}"))?;
    let shard_count = std::env::var(ENV_SHARD_COUNT)
        .with_context(|| format!("{ENV_SHARD_COUNT} missing"))?
        .parse()
        .with_context(|| format!("invalid {ENV_SHARD_COUNT}"))?;
    let gateway_url =
        std::env::var(ENV_GATEWAY_URL).with_context(|| format!("{ENV_GATEWAY_URL} missing"))?;

    Ok(Some(ShardContext {
        shard_id,
        shard_count,
        gateway_url,
    }))
}

/// Run one shard's session engine until a fatal close
///
/// A fatal close surfaces as an error; the caller exits the process
/// nonzero so the supervisor sees the death.
pub async fn run_shard(config: AppConfig, context: ShardContext) -> anyhow::Result<()> {
    tracing::info!(
        shard = context.shard_id,
        shard_count = context.shard_count,
        "Starting shard unit"
    );

    let pool = RedisPool::from_config(&config.redis).context("failed to create Redis pool")?;
    pool.health_check().await.context("Redis unreachable")?;
    let cache = Arc::new(RedisEntityCache::new(pool.clone()));
    let bus = Arc::new(RedisBus::new(pool, RedisBusConfig::default()));

    let engine_config = SessionEngineConfig::from_app(
        &config,
        context.shard_id,
        context.shard_count,
        context.gateway_url,
    );
    let (engine, mut events) = SessionEngine::new(engine_config, bus, cache);

    // Report lifecycle transitions to the supervisor via stdout
    let forward = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            let Some(message) = UnitMessage::from_session_event(&event) else {
                continue;
            };
            match message.to_line() {
                Ok(mut line) => {
                    line.push('\n');
                    if stdout.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode unit message"),
            }
        }
    });

    let result = engine.run().await;
    forward.abort();

    result.context("gateway session ended fatally")
}
