//! Error types for Pixora
//!
//! Every store operation returns `ClientError` on failure. Errors never
//! escape to a global boundary: callers either match on the variant or
//! render `user_message()` inline.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Fallback shown when the server gave no usable message
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Client-wide error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Rejected locally before any request was made
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend answered with an error status or `success: false`
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport failure
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client-side key/value storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Backend throttled the request (429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Failure of a request shared between several callers
    #[error("{0}")]
    Shared(Arc<ClientError>),
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<Arc<ClientError>> for ClientError {
    fn from(err: Arc<ClientError>) -> Self {
        match Arc::try_unwrap(err) {
            Ok(inner) => inner,
            Err(shared) => ClientError::Shared(shared),
        }
    }
}

impl ClientError {
    /// Build an error from an HTTP status and an optional server message
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        match (status, message) {
            (401, None) => ClientError::Unauthorized,
            (403, None) => ClientError::Forbidden,
            (404, None) => ClientError::NotFound,
            (429, None) => ClientError::RateLimited,
            (status, Some(message)) => ClientError::Api { status, message },
            (status, None) => ClientError::Api {
                status,
                message: GENERIC_ERROR_MESSAGE.to_string(),
            },
        }
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::NotFound => Some(404),
            ClientError::Unauthorized => Some(401),
            ClientError::Forbidden => Some(403),
            ClientError::RateLimited => Some(429),
            ClientError::Api { status, .. } => Some(*status),
            ClientError::HttpClient(e) => e.status().map(|s| s.as_u16()),
            ClientError::Shared(inner) => inner.status(),
            _ => None,
        }
    }

    /// True for authentication/authorization failures (401/403)
    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// Human-readable message for inline display
    ///
    /// Server-provided messages win; transport and decode failures
    /// collapse into the generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(msg) => msg.clone(),
            ClientError::Api { message, .. } => message.clone(),
            ClientError::NotFound => "The requested item could not be found.".to_string(),
            ClientError::Unauthorized => "Please sign in to continue.".to_string(),
            ClientError::Forbidden => "You are not allowed to do that.".to_string(),
            ClientError::RateLimited => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            ClientError::Shared(inner) => inner.user_message(),
            ClientError::HttpClient(_)
            | ClientError::Decode(_)
            | ClientError::Config(_)
            | ClientError::Storage(_)
            | ClientError::Internal(_) => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// Label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::NotFound => "not_found",
            ClientError::Unauthorized => "unauthorized",
            ClientError::Forbidden => "forbidden",
            ClientError::Validation(_) => "validation",
            ClientError::Api { .. } => "api",
            ClientError::HttpClient(_) => "http_client",
            ClientError::Decode(_) => "decode",
            ClientError::Config(_) => "config",
            ClientError::Storage(_) => "storage",
            ClientError::RateLimited => "rate_limited",
            ClientError::Internal(_) => "internal",
            ClientError::Shared(inner) => inner.kind(),
        }
    }
}

/// `{ success, error }` view of an action result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl<T> From<&Result<T>> for ActionOutcome {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ActionOutcome::ok(),
            Err(e) => ActionOutcome::failed(e.user_message()),
        }
    }
}

impl<T> From<Result<T>> for ActionOutcome {
    fn from(result: Result<T>) -> Self {
        ActionOutcome::from(&result)
    }
}

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
