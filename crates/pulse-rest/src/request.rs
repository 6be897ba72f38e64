//! API requests
//!
//! A `Route` plus verb and options becomes an `ApiRequest`, the unit the
//! dispatch engine queues and executes.

use crate::route::{Method, Route, RouteBuilder};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;

/// A binary file attached to a request (sent as multipart)
#[derive(Debug, Clone)]
pub struct FileAttachment {
    /// Form field and file name
    pub name: String,
    /// Raw file bytes
    pub data: Vec<u8>,
}

/// Options attached to one API request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// JSON body (or the `payload_json` part when files are attached)
    pub data: Option<Value>,
    /// Query string pairs; entries with a null value are dropped
    pub query: Vec<(String, Value)>,
    /// Audit log reason, sent percent-encoded in `X-Audit-Log-Reason`
    pub reason: Option<String>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// File attachments; their presence switches the body to multipart
    pub files: Vec<FileAttachment>,
    /// Send the Authorization header
    pub auth: bool,
    /// Prefix the path with the API version
    pub versioned: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            data: None,
            query: Vec::new(),
            reason: None,
            headers: Vec::new(),
            files: Vec::new(),
            auth: true,
            versioned: true,
        }
    }
}

impl RequestOptions {
    /// Attach a JSON body
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Append a query pair
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the audit log reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a file
    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.files.push(FileAttachment {
            name: name.into(),
            data,
        });
        self
    }

    /// Skip the Authorization header
    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.auth = false;
        self
    }

    /// Skip the version prefix
    #[must_use]
    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }
}

/// One executable API request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Request path including the query string
    pub path: String,
    /// Rate-limit bucket key derived from the route
    pub route_key: String,
    pub options: RequestOptions,
}

impl ApiRequest {
    /// Build a request from a route, verb, and options
    #[must_use]
    pub fn new(route: &Route, method: Method, options: RequestOptions) -> Self {
        let mut path = route.path();

        let query = Self::encode_query(&options.query);
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query);
        }

        Self {
            method,
            path,
            route_key: route.bucket_key(),
            options,
        }
    }

    /// Encode query pairs, dropping null values
    fn encode_query(query: &[(String, Value)]) -> String {
        let mut encoded = String::new();
        for (key, value) in query {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !encoded.is_empty() {
                encoded.push('&');
            }
            encoded.push_str(&utf8_percent_encode(key, NON_ALPHANUMERIC).to_string());
            encoded.push('=');
            encoded.push_str(&utf8_percent_encode(&text, NON_ALPHANUMERIC).to_string());
        }
        encoded
    }
}

impl RouteBuilder {
    /// Finalize with an arbitrary verb
    #[must_use]
    pub fn verb(self, method: Method, options: RequestOptions) -> ApiRequest {
        ApiRequest::new(&self.build(), method, options)
    }

    /// Finalize as GET
    #[must_use]
    pub fn get(self, options: RequestOptions) -> ApiRequest {
        self.verb(Method::Get, options)
    }

    /// Finalize as POST
    #[must_use]
    pub fn post(self, options: RequestOptions) -> ApiRequest {
        self.verb(Method::Post, options)
    }

    /// Finalize as PATCH
    #[must_use]
    pub fn patch(self, options: RequestOptions) -> ApiRequest {
        self.verb(Method::Patch, options)
    }

    /// Finalize as PUT
    #[must_use]
    pub fn put(self, options: RequestOptions) -> ApiRequest {
        self.verb(Method::Put, options)
    }

    /// Finalize as DELETE
    #[must_use]
    pub fn delete(self, options: RequestOptions) -> ApiRequest {
        self.verb(Method::Delete, options)
    }
}
