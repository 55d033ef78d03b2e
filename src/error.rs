//! API error taxonomy.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is classified exactly once, where the HTTP response (or the
//! lack of one) is first seen. Downstream code matches on [`ApiError`]
//! variants and never re-reads status codes or response bodies.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::store::StoreError;
use crate::transport::{ApiResponse, TransportError};

/// Field name → messages, as reported in a 400 `details` object.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server rejected the email/password pair.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// 400 with per-field `details`.
    #[error("validation failed: {message}")]
    ValidationFailed { message: String, fields: FieldErrors },

    /// 5xx from the server.
    #[error("server error: status {status}")]
    ServerError { status: u16 },

    /// No response was received.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The refresh token could not be exchanged; credentials were cleared.
    #[error("session expired")]
    SessionExpired,

    /// Any other non-success status (403, 404, a 401 on a replayed call, ...).
    #[error("request rejected: status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A success response whose body did not match the expected shape.
    #[error("response parse failed: {0}")]
    Decode(String),

    /// Credentials could not be persisted.
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl ApiError {
    /// Classify a non-success response from an ordinary (already
    /// authenticated) API call.
    #[must_use]
    pub fn from_response(response: &ApiResponse) -> Self {
        let body = ErrorBody::parse(&response.body);
        match response.status {
            400 => body.into_validation(),
            500..=599 => Self::ServerError { status: response.status },
            status => Self::Rejected { status, message: body.message().unwrap_or_else(|| format!("HTTP {status}")) },
        }
    }

    /// Classify a non-success response from `auth/login/` or `auth/register/`.
    ///
    /// A 401 here means bad credentials rather than a stale session, and a 400
    /// carrying only `non_field_errors` is how the server reports a wrong
    /// email/password pair.
    #[must_use]
    pub fn from_auth_response(response: &ApiResponse) -> Self {
        let body = ErrorBody::parse(&response.body);
        match response.status {
            401 => Self::InvalidCredentials {
                message: body.message().unwrap_or_else(|| "Invalid email or password.".to_owned()),
            },
            400 if body.only_non_field_errors() => Self::InvalidCredentials {
                message: body.first_non_field_error().unwrap_or_else(|| "Invalid email or password.".to_owned()),
            },
            _ => Self::from_response(response),
        }
    }

    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Human-readable message suitable for showing to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials { .. } => "Invalid email or password. Please check your credentials.".to_owned(),
            Self::ValidationFailed { message, fields } => field_message(fields).unwrap_or_else(|| message.clone()),
            Self::ServerError { .. } => "Server error. Please try again later.".to_owned(),
            Self::NetworkUnavailable(_) => "Network error. Please check your connection.".to_owned(),
            Self::SessionExpired => "Your session has expired. Please log in again.".to_owned(),
            Self::Rejected { message, .. } => message.clone(),
            Self::Decode(_) => "Unexpected response from the server.".to_owned(),
            Self::Storage(_) => "Could not save your session on this device.".to_owned(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        Self::NetworkUnavailable(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

// Fields in the order a form shows them; the first one with an error wins.
const FIELD_LABELS: &[(&str, &str)] = &[
    ("email", "Email error"),
    ("username", "Username error"),
    ("password", "Password error"),
    ("password_confirm", "Password confirmation error"),
];

fn field_message(fields: &FieldErrors) -> Option<String> {
    for (field, label) in FIELD_LABELS {
        if let Some(first) = fields.get(*field).and_then(|msgs| msgs.first()) {
            return Some(format!("{label}: {first}"));
        }
    }
    if let Some(first) = fields.get(NON_FIELD_ERRORS).and_then(|msgs| msgs.first()) {
        return Some(first.clone());
    }
    fields
        .iter()
        .find_map(|(field, msgs)| msgs.first().map(|m| format!("{field}: {m}")))
}

// =============================================================================
// WIRE SHAPE
// =============================================================================

/// `{"error": "...", "details": {...} | "..."}` or DRF's `{"detail": "..."}`.
#[derive(Debug, Default)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
    fields: FieldErrors,
}

impl ErrorBody {
    fn parse(raw: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
            return Self::default();
        };
        let error = map.get("error").and_then(Value::as_str).map(str::to_owned);
        let detail = map.get("detail").and_then(Value::as_str).map(str::to_owned);
        let fields = match map.get("details") {
            Some(Value::Object(details)) => collect_fields(details),
            _ => {
                // Some endpoints return field errors at the top level.
                let top: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "error" | "detail" | "details"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                collect_fields(&top)
            }
        };
        Self { error, detail, fields }
    }

    fn message(&self) -> Option<String> {
        self.error.clone().or_else(|| self.detail.clone())
    }

    fn only_non_field_errors(&self) -> bool {
        !self.fields.is_empty() && self.fields.keys().all(|k| k == NON_FIELD_ERRORS)
    }

    fn first_non_field_error(&self) -> Option<String> {
        self.fields.get(NON_FIELD_ERRORS).and_then(|m| m.first()).cloned()
    }

    fn into_validation(self) -> ApiError {
        let message = self
            .message()
            .unwrap_or_else(|| "Please check your input and try again.".to_owned());
        ApiError::ValidationFailed { message, fields: self.fields }
    }
}

fn collect_fields(map: &serde_json::Map<String, Value>) -> FieldErrors {
    map.iter()
        .filter_map(|(field, value)| {
            let msgs: Vec<String> = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
                _ => Vec::new(),
            };
            (!msgs.is_empty()).then(|| (field.clone(), msgs))
        })
        .collect()
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
