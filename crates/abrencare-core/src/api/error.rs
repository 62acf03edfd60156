use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Message used when a 401 carries no detail of its own.
const UNAUTHORIZED_MESSAGE: &str = "Unauthorized - token may be expired";

/// Body keys the backend uses for a human-readable error, in priority order.
const DETAIL_KEYS: [&str; 3] = ["detail", "error", "message"];

/// Field-error key that is not tied to any single field.
const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Error, Debug)]
pub enum ApiError {
    /// No response reached the client (connect failure, timeout, reset).
    #[error("Unable to reach {origin}. Check your connection and try again.")]
    Network {
        origin: String,
        #[source]
        source: reqwest::Error,
    },

    /// 401 from the server. Stored credentials have already been cleared.
    #[error("{message}")]
    Unauthorized { message: String },

    /// 400-class rejection with the backend's message.
    #[error("{message}")]
    Validation {
        status: u16,
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("{message}")]
    RequestFailed {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn network(origin: impl Into<String>, source: reqwest::Error) -> Self {
        ApiError::Network {
            origin: origin.into(),
            source,
        }
    }

    /// Classify a non-success response.
    ///
    /// This is the only place the backend's error body is inspected. A `detail`
    /// (or `error`/`message`) string is surfaced verbatim; otherwise field
    /// errors such as `{"username": ["already exists"]}` supply the message.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let detail = parsed.as_ref().and_then(detail_message);
        let fields = parsed.as_ref().map(field_errors).unwrap_or_default();

        match status.as_u16() {
            401 => ApiError::Unauthorized {
                message: detail.unwrap_or_else(|| UNAUTHORIZED_MESSAGE.to_string()),
            },
            code @ 400..=499 => {
                let message = detail
                    .or_else(|| first_field_error(&fields))
                    .unwrap_or_else(|| format!("Request rejected with status {}", code));
                ApiError::Validation {
                    status: code,
                    message,
                    fields,
                }
            }
            code => ApiError::RequestFailed {
                status: code,
                message: detail.unwrap_or_else(|| format!("Request failed with status {}", status)),
                body: Self::truncate_body(body),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Validation { status, .. } | ApiError::RequestFailed { status, .. } => {
                Some(*status)
            }
            ApiError::Network { .. } | ApiError::InvalidResponse(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    /// Backend messages attached to one field of a validation error.
    pub fn field_errors(&self, field: &str) -> Option<&[String]> {
        match self {
            ApiError::Validation { fields, .. } => fields.get(field).map(Vec::as_slice),
            _ => None,
        }
    }
}

fn detail_message(body: &Value) -> Option<String> {
    DETAIL_KEYS
        .iter()
        .filter_map(|key| body.get(key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
}

fn field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
    let Some(object) = body.as_object() else {
        return BTreeMap::new();
    };

    object
        .iter()
        .filter(|(key, _)| !DETAIL_KEYS.contains(&key.as_str()))
        .filter_map(|(key, value)| {
            let messages: Vec<String> = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            (!messages.is_empty()).then(|| (key.clone(), messages))
        })
        .collect()
}

fn first_field_error(fields: &BTreeMap<String, Vec<String>>) -> Option<String> {
    if let Some(message) = fields.get(NON_FIELD_ERRORS).and_then(|m| m.first()) {
        return Some(message.clone());
    }
    fields
        .iter()
        .find_map(|(field, messages)| messages.first().map(|m| format!("{}: {}", field, m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_uses_detail_verbatim() {
        let err = ApiError::from_response(
            StatusCode::UNAUTHORIZED,
            r#"{"detail":"Invalid credentials"}"#,
        );
        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_unauthorized_without_body() {
        let err = ApiError::from_response(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.to_string(), UNAUTHORIZED_MESSAGE);
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_bad_request_error_key() {
        let err = ApiError::from_response(StatusCode::BAD_REQUEST, r#"{"error":"Invalid credentials"}"#);
        assert!(matches!(err, ApiError::Validation { status: 400, .. }));
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_bad_request_field_errors() {
        let body = r#"{"username":["A user with that username already exists."],"email":"Enter a valid email address."}"#;
        let err = ApiError::from_response(StatusCode::BAD_REQUEST, body);
        assert_eq!(
            err.field_errors("username"),
            Some(&["A user with that username already exists.".to_string()][..])
        );
        assert_eq!(
            err.field_errors("email").map(|m| m.len()),
            Some(1)
        );
        // BTreeMap order: "email" sorts before "username"
        assert_eq!(err.to_string(), "email: Enter a valid email address.");
    }

    #[test]
    fn test_non_field_errors_have_no_prefix() {
        let body = r#"{"non_field_errors":["Unable to log in."],"password":["Too short."]}"#;
        let err = ApiError::from_response(StatusCode::BAD_REQUEST, body);
        assert_eq!(err.to_string(), "Unable to log in.");
    }

    #[test]
    fn test_server_error_is_request_failed_with_status() {
        let err = ApiError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "<html>boom</html>");
        assert_eq!(err.status(), Some(500));
        assert!(matches!(err, ApiError::RequestFailed { status: 500, .. }));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_server_error_detail_surfaced() {
        let err = ApiError::from_response(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"detail":"Maintenance in progress"}"#,
        );
        assert_eq!(err.to_string(), "Maintenance in progress");
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 520 total bytes"));

        // Never split a multi-byte character
        let accents = "é".repeat(MAX_ERROR_BODY_LENGTH);
        assert!(ApiError::truncate_body(&accents).contains("truncated"));
    }
}
