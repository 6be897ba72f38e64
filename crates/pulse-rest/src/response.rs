//! Successful response bodies

use crate::error::{RestError, RestResult};
use crate::route::Method;
use crate::transport::HttpResponse;
use serde_json::Value;

/// Parsed body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// JSON per the content type
    Json(Value),
    /// Anything else, raw
    Binary(Vec<u8>),
    /// No content
    Empty,
}

/// A resolved API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Parse a 2xx response per its content type
    pub fn parse(response: &HttpResponse, method: Method, path: &str) -> RestResult<Self> {
        let body = if response.body.is_empty() {
            ResponseBody::Empty
        } else if response.is_json() {
            let value = serde_json::from_slice(&response.body).map_err(|e| {
                tracing::warn!(path = %path, error = %e, "Response declared JSON but failed to parse");
                RestError::Http {
                    status: response.status,
                    method,
                    path: path.to_string(),
                }
            })?;
            ResponseBody::Json(value)
        } else {
            ResponseBody::Binary(response.body.clone())
        };

        Ok(Self {
            status: response.status,
            body,
        })
    }

    /// The JSON body, when there is one
    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}
