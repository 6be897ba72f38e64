//! Route buckets
//!
//! One bucket per normalized route key. A bucket owns a FIFO queue and
//! executes at most one request at a time; 429 and 5xx retries re-enter at
//! the head so they run before anything queued later. Buckets run
//! concurrently with each other, bounded only by the global throttle.

use crate::error::{RestError, RestResult};
use crate::ratelimit::{local_now_ms, GlobalThrottle, RateLimitInfo};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::transport::HttpTransport;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// State shared by every bucket of one client
pub struct BucketShared {
    pub transport: Arc<dyn HttpTransport>,
    /// Retries allowed for 5xx responses
    pub retry_limit: u32,
    /// Extra clock offset added when waiting out a reset, in milliseconds
    pub time_offset_ms: i64,
    /// The process-wide global throttle
    pub global: GlobalThrottle,
}

/// One queued API call
pub struct PendingRequest {
    pub request: ApiRequest,
    /// 5xx retries consumed so far; 429 retries do not count
    pub retries: u32,
    pub resolve: oneshot::Sender<RestResult<ApiResponse>>,
}

struct BucketState {
    queue: VecDeque<PendingRequest>,
    busy: bool,
    limit: Option<u64>,
    remaining: i64,
    reset_at_ms: Option<i64>,
}

impl BucketState {
    /// Absorb quota headers from a response
    fn apply(&mut self, info: &RateLimitInfo) {
        self.limit = info.limit;
        // Never track a negative balance
        self.remaining = info.remaining.max(0);
        self.reset_at_ms = Some(info.reset_at_ms);
    }

    /// How long to wait before the next dispatch, if the window is spent
    fn delay_ms(&self, now_ms: i64, offset_ms: i64) -> Option<u64> {
        let reset_at = self.reset_at_ms?;
        if self.remaining <= 0 && now_ms < reset_at {
            let wait = (reset_at + offset_ms - now_ms).max(0);
            Some(wait as u64)
        } else {
            None
        }
    }
}

/// A rate-limit bucket serializing requests for one route key
pub struct RouteBucket {
    key: String,
    state: Mutex<BucketState>,
}

impl RouteBucket {
    /// Create an idle bucket
    #[must_use]
    pub fn new(key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            state: Mutex::new(BucketState {
                queue: VecDeque::new(),
                busy: false,
                limit: None,
                remaining: 1,
                reset_at_ms: None,
            }),
        })
    }

    /// The normalized route key this bucket serves
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Enqueue a request; starts the drain task when the bucket is idle
    pub fn push(self: &Arc<Self>, item: PendingRequest, shared: Arc<BucketShared>) {
        let start = {
            let mut state = self.state.lock();
            state.queue.push_back(item);
            if state.busy {
                false
            } else {
                state.busy = true;
                true
            }
        };

        if start {
            let bucket = Arc::clone(self);
            tokio::spawn(async move {
                bucket.run(shared).await;
            });
        }
    }

    /// Drain the queue, one request at a time
    async fn run(self: Arc<Self>, shared: Arc<BucketShared>) {
        loop {
            let item = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        state.busy = false;
                        return;
                    }
                }
            };

            self.execute(item, &shared).await;
        }
    }

    /// Put a request back at the head of the queue for retry
    fn requeue_front(&self, item: PendingRequest) {
        self.state.lock().queue.push_front(item);
    }

    /// Execute one request, honoring local and global limits
    async fn execute(&self, mut item: PendingRequest, shared: &BucketShared) {
        // A set global throttle blocks every bucket's next dispatch
        shared.global.wait().await;

        let wait_ms = {
            let state = self.state.lock();
            state.delay_ms(local_now_ms(), shared.time_offset_ms)
        };
        if let Some(wait_ms) = wait_ms {
            tracing::debug!(bucket = %self.key, wait_ms, "Bucket window spent, waiting for reset");
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        let method = item.request.method;
        let path = item.request.path.clone();

        let response = match shared.transport.perform(&item.request).await {
            Ok(response) => response,
            Err(failure) => {
                tracing::warn!(bucket = %self.key, method = %method, path = %path, error = %failure, "Transport failure");
                let _ = item.resolve.send(Err(RestError::Transport {
                    method,
                    path,
                    source: failure,
                }));
                return;
            }
        };

        let info = RateLimitInfo::from_response(&response, local_now_ms());
        let retry_after_ms = info.retry_after_ms.unwrap_or(0);
        let global = info.global;
        self.state.lock().apply(&info);

        if global {
            tracing::warn!(
                bucket = %self.key,
                retry_after_ms,
                "Global rate limit hit, throttling all buckets"
            );
            shared.global.set(Duration::from_millis(retry_after_ms));
        }

        if response.is_success() {
            let _ = item.resolve.send(ApiResponse::parse(&response, method, &path));
            return;
        }

        match response.status {
            429 => {
                tracing::warn!(
                    bucket = %self.key,
                    method = %method,
                    path = %path,
                    retry_after_ms,
                    "Rate limited, retrying at the head of the queue"
                );
                // Retried ahead of newer requests; does not consume the
                // 5xx retry budget
                self.requeue_front(item);
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
            }
            status @ 500..=599 => {
                if item.retries >= shared.retry_limit {
                    tracing::error!(
                        bucket = %self.key,
                        method = %method,
                        path = %path,
                        status,
                        "Server error after exhausted retries"
                    );
                    let _ = item.resolve.send(Err(RestError::Http {
                        status,
                        method,
                        path,
                    }));
                } else {
                    item.retries += 1;
                    tracing::warn!(
                        bucket = %self.key,
                        status,
                        attempt = item.retries,
                        "Server error, retrying"
                    );
                    self.requeue_front(item);
                }
            }
            status => {
                let error = match serde_json::from_slice::<Value>(&response.body) {
                    Ok(body) if response.is_json() => {
                        RestError::from_api_body(&body, method, path, status)
                    }
                    _ => RestError::Http {
                        status,
                        method,
                        path,
                    },
                };
                let _ = item.resolve.send(Err(error));
            }
        }
    }
}

impl std::fmt::Debug for RouteBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RouteBucket")
            .field("key", &self.key)
            .field("busy", &state.busy)
            .field("queued", &state.queue.len())
            .field("remaining", &state.remaining)
            .finish()
    }
}
