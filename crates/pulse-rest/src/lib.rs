//! # pulse-rest
//!
//! Rate-limit-aware dispatch engine for the request/response API: explicit
//! route building with bucket-key normalization, per-route FIFO queues
//! honoring server-communicated quotas, 429/5xx retry policy, and a
//! process-wide global throttle.

pub mod bootstrap;
pub mod bucket;
pub mod client;
pub mod error;
pub mod error_codes;
pub mod ratelimit;
pub mod request;
pub mod response;
pub mod route;
pub mod transport;

// Re-export commonly used types at crate root
pub use bootstrap::{BootstrapInfo, SessionStartLimit};
pub use client::{RestClient, RestClientConfig};
pub use error::{RestError, RestResult};
pub use request::{ApiRequest, FileAttachment, RequestOptions};
pub use response::{ApiResponse, ResponseBody};
pub use route::{Method, Route, RouteBuilder};
pub use transport::{HttpResponse, HttpTransport, TransportFailure};
