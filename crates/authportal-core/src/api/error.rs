use serde::Deserialize;
use thiserror::Error;

use crate::auth::ValidationError;

/// User-facing text for transport failures on the session-critical path
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error. Please check your network.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Request rejected ({status}): {message}")]
    AuthRejected { status: u16, message: String },

    #[error("Unauthorized - token may be expired")]
    TokenExpired,

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    OAuthDenied(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

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

    /// Pull the server's `message` field out of an error body.
    /// Falls back to `fallback` when the body is empty, not JSON, or has no message.
    fn server_message(body: &str, fallback: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.trim().is_empty())
            .map(|m| Self::truncate_body(&m))
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Map a non-success status on an unauthenticated call (login, signup, refresh).
    /// A 401 here is a rejected credential, not an expired token.
    pub fn from_status(status: reqwest::StatusCode, body: &str, fallback: &str) -> Self {
        let message = Self::server_message(body, fallback);
        match status.as_u16() {
            code @ 500..=599 => ApiError::ServerError { status: code, message },
            code => ApiError::AuthRejected { status: code, message },
        }
    }

    /// Map a non-success status on a bearer-authenticated call
    pub fn from_bearer_status(status: reqwest::StatusCode, body: &str, fallback: &str) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            ApiError::TokenExpired
        } else {
            Self::from_status(status, body, fallback)
        }
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(self, ApiError::TokenExpired)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// Text suitable for showing to the user. Server messages pass through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation(e) => e.to_string(),
            ApiError::NotAuthenticated => "Please log in to continue".to_string(),
            ApiError::AuthRejected { message, .. } | ApiError::ServerError { message, .. } => {
                message.clone()
            }
            ApiError::TokenExpired => "Your session has expired. Please log in again.".to_string(),
            ApiError::Transport(_) => CONNECTION_ERROR_MESSAGE.to_string(),
            ApiError::InvalidResponse(_) => "Unexpected response from server".to_string(),
            ApiError::InvalidRequest(_) | ApiError::OAuthDenied(_) => self.to_string(),
            ApiError::Storage(_) => "Could not access local storage".to_string(),
        }
    }
}
