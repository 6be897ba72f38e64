//! REST client
//!
//! Lazily creates one route bucket per normalized route key and resolves
//! requests through them.

use crate::bootstrap::BootstrapInfo;
use crate::bucket::{BucketShared, PendingRequest, RouteBucket};
use crate::error::{RestError, RestResult};
use crate::ratelimit::GlobalThrottle;
use crate::request::{ApiRequest, RequestOptions};
use crate::response::ApiResponse;
use crate::route::Route;
use crate::transport::{HttpTransport, ReqwestTransport};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Token role prefix sent in the Authorization header
const TOKEN_PREFIX: &str = "Bot";

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// API base URL without the version path
    pub api_base: String,
    /// API version appended to the base URL
    pub version: u8,
    /// Authentication token, without the role prefix
    pub token: String,
    /// Retries allowed for 5xx responses
    pub retry_limit: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Extra clock offset added when waiting out a rate limit
    pub time_offset_ms: i64,
}

impl RestClientConfig {
    /// Build a configuration with library defaults
    #[must_use]
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            version: 8,
            token: token.into(),
            retry_limit: 1,
            request_timeout: Duration::from_secs(15),
            time_offset_ms: 0,
        }
    }

    /// Build from the loaded application config
    #[must_use]
    pub fn from_app(config: &pulse_common::AppConfig) -> Self {
        Self {
            api_base: config.rest.api_base.clone(),
            version: config.rest.version,
            token: config.gateway.token.clone(),
            retry_limit: config.rest.retry_limit,
            request_timeout: Duration::from_millis(config.rest.request_timeout_ms),
            time_offset_ms: config.rest.time_offset_ms,
        }
    }

    /// Full Authorization header value
    #[must_use]
    pub fn auth_header(&self) -> String {
        format!("{TOKEN_PREFIX} {}", self.token.trim_start_matches("Bot "))
    }
}

/// Rate-limit-aware API client
pub struct RestClient {
    buckets: DashMap<String, Arc<RouteBucket>>,
    shared: Arc<BucketShared>,
}

impl RestClient {
    /// Create a client with the reqwest transport
    pub fn new(config: &RestClientConfig) -> RestResult<Self> {
        let transport = ReqwestTransport::new(
            config.api_base.clone(),
            config.version,
            config.auth_header(),
            config.request_timeout,
        )
        .map_err(RestError::Client)?;

        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over a custom transport
    #[must_use]
    pub fn with_transport(config: &RestClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            buckets: DashMap::new(),
            shared: Arc::new(BucketShared {
                transport,
                retry_limit: config.retry_limit,
                time_offset_ms: config.time_offset_ms,
                global: GlobalThrottle::new(),
            }),
        }
    }

    /// Execute a request through its route bucket
    ///
    /// Requests sharing a route key execute sequentially in queue order;
    /// distinct buckets run concurrently.
    pub async fn request(&self, request: ApiRequest) -> RestResult<ApiResponse> {
        let (resolve, rx) = oneshot::channel();

        let bucket = self
            .buckets
            .entry(request.route_key.clone())
            .or_insert_with(|| RouteBucket::new(request.route_key.clone()))
            .clone();

        bucket.push(
            PendingRequest {
                request,
                retries: 0,
                resolve,
            },
            Arc::clone(&self.shared),
        );

        rx.await.map_err(|_| RestError::Dropped)?
    }

    /// Query the platform for the gateway URL and recommended shard count
    pub async fn fetch_gateway(&self) -> RestResult<BootstrapInfo> {
        let request = Route::builder()
            .segment("gateway")
            .segment("bot")
            .get(RequestOptions::default());
        let response = self.request(request).await?;

        let value = response
            .json()
            .ok_or_else(|| RestError::Malformed("gateway response was not JSON".to_string()))?;

        serde_json::from_value(value.clone())
            .map_err(|e| RestError::Malformed(format!("gateway response: {e}")))
    }

    /// Number of buckets created so far
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
