use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum DaemonApiError {
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    /// Success status, but nothing to read from.
    MissingBody(StatusCode),
    Serde(JsonError),
    Cancelled,
    Unknown(String),
}

impl DaemonApiError {
    /// Whether the error came from the caller abandoning the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error body shape produced by the daemon's web layer.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    pub message: Option<String>,
    pub error: Option<String>,
    pub status: Option<u16>,
}

impl ErrorPayload {
    pub fn message_or_fallback(&self) -> Option<String> {
        let explicit = self
            .message
            .as_deref()
            .and_then(non_empty_string)
            .or_else(|| self.error.as_deref().and_then(non_empty_string))?;
        Some(explicit.to_owned())
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.message_or_fallback(), self.status) {
            (Some(message), Some(status)) => write!(f, "{message} ({status})"),
            (Some(message), None) => write!(f, "{message}"),
            (None, _) => write!(f, "unknown error"),
        }
    }
}

impl fmt::Display for DaemonApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::MissingBody(status) => write!(f, "HTTP {status} response has no body"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for DaemonApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DaemonApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for DaemonApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a user-facing message from a non-success response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.to_string()
        }
    };

    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(payload) => payload.message_or_fallback().unwrap_or_else(fallback),
        Err(_) => fallback(),
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
