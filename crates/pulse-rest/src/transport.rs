//! HTTP transport seam
//!
//! The dispatch engine performs requests through this trait; production
//! uses reqwest, tests script responses.

use crate::request::ApiRequest;
use crate::route::Method;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// User agent sent with every request
const USER_AGENT: &str = concat!("pulse (", env!("CARGO_PKG_VERSION"), ")");

/// Transport-level failure (connection, TLS, timeout)
#[derive(Debug, thiserror::Error)]
pub enum TransportFailure {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Http(String),
}

/// One raw HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Headers with lowercased names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Get a header by its lowercase name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether the body declares itself as JSON
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|ct| ct.starts_with("application/json"))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes prepared API requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one request; retries and rate limiting live above this
    async fn perform(&self, request: &ApiRequest) -> Result<HttpResponse, TransportFailure>;
}

/// Production transport backed by reqwest
pub struct ReqwestTransport {
    client: reqwest::Client,
    api_base: String,
    version: u8,
    auth: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build the transport
    ///
    /// `auth` is the full Authorization header value including the role
    /// prefix (e.g. `Bot <token>`).
    pub fn new(
        api_base: impl Into<String>,
        version: u8,
        auth: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            version,
            auth: auth.into(),
            timeout,
        })
    }

    /// Full URL for a request, honoring the versioned toggle
    fn url_for(&self, request: &ApiRequest) -> String {
        if request.options.versioned {
            format!("{}/v{}{}", self.api_base, self.version, request.path)
        } else {
            format!("{}{}", self.api_base, request.path)
        }
    }

    fn reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn perform(&self, request: &ApiRequest) -> Result<HttpResponse, TransportFailure> {
        let url = self.url_for(request);
        let mut builder = self
            .client
            .request(Self::reqwest_method(request.method), &url)
            .timeout(self.timeout);

        if request.options.auth {
            builder = builder.header(reqwest::header::AUTHORIZATION, &self.auth);
        }
        if let Some(reason) = &request.options.reason {
            let encoded = percent_encoding::utf8_percent_encode(
                reason,
                percent_encoding::NON_ALPHANUMERIC,
            )
            .to_string();
            builder = builder.header("X-Audit-Log-Reason", encoded);
        }
        for (name, value) in &request.options.headers {
            builder = builder.header(name, value);
        }

        if request.options.files.is_empty() {
            if let Some(data) = &request.options.data {
                builder = builder.json(data);
            }
        } else {
            // Multipart body: each file as a part plus a payload_json part
            let mut form = reqwest::multipart::Form::new();
            for file in &request.options.files {
                let part = reqwest::multipart::Part::bytes(file.data.clone())
                    .file_name(file.name.clone());
                form = form.part(file.name.clone(), part);
            }
            if let Some(data) = &request.options.data {
                form = form.text("payload_json", data.to_string());
            }
            builder = builder.multipart(form);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportFailure::Timeout
            } else {
                TransportFailure::Http(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::Http(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("api_base", &self.api_base)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestOptions;
    use crate::route::Route;

    #[test]
    fn test_url_building() {
        let transport = ReqwestTransport::new(
            "https://api.example/api/",
            8,
            "Bot token",
            Duration::from_secs(5),
        )
        .unwrap();

        let versioned = Route::builder()
            .segment("users")
            .segment("@me")
            .get(RequestOptions::default());
        assert_eq!(
            transport.url_for(&versioned),
            "https://api.example/api/v8/users/@me"
        );

        let bare = Route::builder()
            .segment("gateway")
            .get(RequestOptions::default().unversioned());
        assert_eq!(transport.url_for(&bare), "https://api.example/api/gateway");
    }

    #[test]
    fn test_response_helpers() {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/json; charset=utf-8".to_string(),
        );
        let response = HttpResponse {
            status: 200,
            headers,
            body: b"{}".to_vec(),
        };

        assert!(response.is_json());
        assert!(response.is_success());
        assert_eq!(
            response.header("content-type"),
            Some("application/json; charset=utf-8")
        );

        let error = HttpResponse {
            status: 502,
            headers: HashMap::new(),
            body: Vec::new(),
        };
        assert!(!error.is_success());
        assert!(!error.is_json());
    }
}
