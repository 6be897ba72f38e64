//! REST error taxonomy
//!
//! Three terminal failure shapes surface to callers: transport failures
//! (including timeouts), structured API errors from 4xx bodies, and bare
//! HTTP errors for exhausted 5xx retries or unexpected responses.

use crate::error_codes::message_for;
use crate::route::Method;
use crate::transport::TransportFailure;
use serde_json::Value;

/// Error type for REST operations
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Socket/HTTP transport failure or timeout; never retried at this layer
    #[error("{method} {path}: {source}")]
    Transport {
        method: Method,
        path: String,
        #[source]
        source: TransportFailure,
    },

    /// 4xx with a server-defined error body; never retried
    #[error("API error {code} on {method} {path}: {message}")]
    Api {
        code: i64,
        message: String,
        method: Method,
        path: String,
        status: u16,
    },

    /// 5xx after the retry budget, or an unexpected response shape
    #[error("HTTP {status} on {method} {path}")]
    Http {
        status: u16,
        method: Method,
        path: String,
    },

    /// The dispatch engine dropped the request before completion
    #[error("request dropped before completion")]
    Dropped,

    /// Failed to construct the HTTP client
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// A response parsed but did not carry the expected fields
    #[error("malformed API response: {0}")]
    Malformed(String),
}

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;

impl RestError {
    /// Build a structured API error from a 4xx response body
    ///
    /// Nested field-level validation messages are flattened depth-first
    /// into the message; an empty server message falls back to the static
    /// error-code table.
    #[must_use]
    pub fn from_api_body(body: &Value, method: Method, path: String, status: u16) -> Self {
        let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);

        let flattened = flatten_errors(body.get("errors").unwrap_or(body), "").join("\n");
        let server_message = body.get("message").and_then(Value::as_str).unwrap_or("");

        let message = match (server_message.is_empty(), flattened.is_empty()) {
            (false, false) => format!("{server_message}\n{flattened}"),
            (false, true) => server_message.to_string(),
            (true, false) => flattened,
            (true, true) => message_for(code).unwrap_or("Unknown error").to_string(),
        };

        Self::Api {
            code,
            message,
            method,
            path,
            status,
        }
    }
}

/// Flatten a nested error object into one message per leaf, depth-first
///
/// Special cases: `_errors` arrays of `{code, message}` objects are joined
/// inline, objects carrying `code`/`message` render as `code: message`,
/// and bare strings pass through. Numeric keys render as indices.
#[must_use]
pub fn flatten_errors(value: &Value, key: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let Some(map) = value.as_object() else {
        return messages;
    };

    for (k, v) in map {
        if k == "message" {
            continue;
        }

        let new_key = if key.is_empty() {
            k.clone()
        } else if k.parse::<usize>().is_ok() {
            format!("{key}[{k}]")
        } else {
            format!("{key}.{k}")
        };

        if let Some(errors) = v.get("_errors").and_then(Value::as_array) {
            let joined = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            messages.push(format!("{new_key}: {joined}"));
        } else if v.get("code").is_some() || v.get("message").is_some() {
            let code = v.get("code").map(render_scalar).unwrap_or_default();
            let text = v.get("message").map(render_scalar).unwrap_or_default();
            let prefix = if code.is_empty() {
                String::new()
            } else {
                format!("{code}: ")
            };
            messages.push(format!("{prefix}{text}").trim().to_string());
        } else if let Some(s) = v.as_str() {
            messages.push(s.to_string());
        } else {
            messages.extend(flatten_errors(v, &new_key));
        }
    }

    messages
}

/// Render a scalar JSON value without string quotes
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_field_errors() {
        let body = serde_json::json!({
            "embed": {
                "fields": {
                    "0": {
                        "name": { "_errors": [{ "code": "BASE_TYPE_REQUIRED", "message": "This field is required" }] }
                    }
                }
            }
        });

        let messages = flatten_errors(&body, "");
        assert_eq!(
            messages,
            vec!["embed.fields[0].name: This field is required"]
        );
    }

    #[test]
    fn test_flatten_code_message_objects() {
        let body = serde_json::json!({
            "access": { "code": 50001, "message": "Missing access" }
        });
        let messages = flatten_errors(&body, "");
        assert_eq!(messages, vec!["50001: Missing access"]);
    }

    #[test]
    fn test_flatten_bare_strings() {
        let body = serde_json::json!({ "name": "must not be empty" });
        let messages = flatten_errors(&body, "");
        assert_eq!(messages, vec!["must not be empty"]);
    }

    #[test]
    fn test_api_error_combines_message_and_fields() {
        let body = serde_json::json!({
            "code": 50035,
            "message": "Invalid Form Body",
            "errors": {
                "content": { "_errors": [{ "code": "BASE_TYPE_MAX_LENGTH", "message": "Must be 2000 or fewer in length." }] }
            }
        });

        let error = RestError::from_api_body(&body, Method::Post, "/channels/1/messages".to_string(), 400);
        match error {
            RestError::Api { code, message, status, .. } => {
                assert_eq!(code, 50035);
                assert_eq!(status, 400);
                assert!(message.starts_with("Invalid Form Body\n"));
                assert!(message.contains("content: Must be 2000 or fewer in length."));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_api_error_falls_back_to_static_table() {
        let body = serde_json::json!({ "code": 10003 });
        let error = RestError::from_api_body(&body, Method::Get, "/channels/1".to_string(), 404);
        match error {
            RestError::Api { message, .. } => assert_eq!(message, "Unknown channel"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
