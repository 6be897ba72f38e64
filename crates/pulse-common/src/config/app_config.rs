//! Application configuration structs
//!
//! Loads configuration from environment variables.

use pulse_core::Intents;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub rest: RestConfig,
    pub redis: RedisConfig,
    pub supervisor: SupervisorConfig,
}

/// General application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Total shard count, explicit or resolved from the bootstrap query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardCount {
    /// Ask the platform for its recommended count
    Auto,
    /// Fixed count
    Fixed(u16),
}

impl FromStr for ShardCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<u16>()
            .map(Self::Fixed)
            .map_err(|_| format!("expected a shard count or \"auto\", got {s:?}"))
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Authentication token (without role prefix)
    pub token: String,
    /// Intents bitmask sent with Identify
    pub intents: Intents,
    /// Total shard count ("auto" resolves via the bootstrap query)
    pub shards: ShardCount,
    /// Gateway URL override; resolved from the bootstrap query when unset
    pub url: Option<String>,
    /// Payload encoding ("json" or "msgpack")
    pub encoding: String,
    /// Whether to request zlib-stream transport compression
    pub compress: bool,
    /// Delay before reconnecting after a socket close, in milliseconds
    pub reconnect_delay_ms: u64,
}

/// REST dispatch engine configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// API base URL (without version path)
    pub api_base: String,
    /// API version appended to the base URL
    pub version: u8,
    /// Retries allowed for 5xx responses before surfacing an error
    pub retry_limit: u32,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Extra clock offset added when waiting out a rate limit, in milliseconds
    pub time_offset_ms: i64,
}

/// Redis configuration (cache and bus)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Sharding supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Restart units that die unexpectedly
    pub respawn: bool,
    /// Delay before restarting a dead unit, in milliseconds
    pub respawn_delay_ms: u64,
    /// Delay between consecutive unit starts, in milliseconds
    pub stagger_delay_ms: u64,
}

// Default value functions
fn default_app_name() -> String {
    "pulse".to_string()
}

fn default_host_api() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> u8 {
    8
}

fn default_encoding() -> String {
    "json".to_string()
}

fn default_retry_limit() -> u32 {
    1
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_respawn_delay_ms() -> u64 {
    500
}

fn default_stagger_delay_ms() -> u64 {
    5_000
}

fn default_redis_max_connections() -> u32 {
    10
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing
    /// or carry unparseable values
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            gateway: GatewayConfig {
                token: env::var("PULSE_TOKEN").map_err(|_| ConfigError::MissingVar("PULSE_TOKEN"))?,
                intents: env::var("PULSE_INTENTS")
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .map_or_else(Intents::default, Intents::from_bits_truncate),
                shards: env::var("PULSE_SHARDS")
                    .ok()
                    .map(|s| {
                        s.parse()
                            .map_err(|e| ConfigError::InvalidValue("PULSE_SHARDS", e))
                    })
                    .transpose()?
                    .unwrap_or(ShardCount::Auto),
                url: env::var("PULSE_GATEWAY_URL").ok(),
                encoding: env::var("PULSE_ENCODING").unwrap_or_else(|_| default_encoding()),
                compress: env::var("PULSE_COMPRESS")
                    .ok()
                    .map_or(true, |s| s != "0" && !s.eq_ignore_ascii_case("false")),
                reconnect_delay_ms: env::var("PULSE_RECONNECT_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_reconnect_delay_ms),
            },
            rest: RestConfig {
                api_base: env::var("PULSE_API_BASE").unwrap_or_else(|_| default_host_api()),
                version: env::var("PULSE_API_VERSION")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_api_version),
                retry_limit: env::var("PULSE_RETRY_LIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_retry_limit),
                request_timeout_ms: env::var("PULSE_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_request_timeout_ms),
                time_offset_ms: env::var("PULSE_TIME_OFFSET_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").map_err(|_| ConfigError::MissingVar("REDIS_URL"))?,
                max_connections: env::var("REDIS_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_redis_max_connections),
            },
            supervisor: SupervisorConfig {
                respawn: env::var("PULSE_RESPAWN")
                    .ok()
                    .map_or(true, |s| s != "0" && !s.eq_ignore_ascii_case("false")),
                respawn_delay_ms: env::var("PULSE_RESPAWN_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_respawn_delay_ms),
                stagger_delay_ms: env::var("PULSE_STAGGER_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_stagger_delay_ms),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_flags() {
        assert!(Environment::Production.is_production());
        assert!(!Environment::Development.is_production());
        assert!(Environment::Development.is_development());
    }

    #[test]
    fn test_shard_count_parse() {
        assert_eq!("auto".parse::<ShardCount>().unwrap(), ShardCount::Auto);
        assert_eq!("AUTO".parse::<ShardCount>().unwrap(), ShardCount::Auto);
        assert_eq!("4".parse::<ShardCount>().unwrap(), ShardCount::Fixed(4));
        assert!("four".parse::<ShardCount>().is_err());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_app_name(), "pulse");
        assert_eq!(default_api_version(), 8);
        assert_eq!(default_retry_limit(), 1);
        assert_eq!(default_stagger_delay_ms(), 5_000);
        assert_eq!(default_respawn_delay_ms(), 500);
        assert_eq!(default_reconnect_delay_ms(), 5_000);
    }
}
