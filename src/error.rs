//! Error types for the VM gate

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Message returned for every authorization denial, whichever tier decided it
pub const FORBIDDEN_MESSAGE: &str = "access denied";

/// Message returned when no authoritative membership answer could be reached
const RESOLVER_UNAVAILABLE_MESSAGE: &str = "authorization service unavailable";

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gate operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable principal on the request
    #[error("not authenticated")]
    Unauthenticated,

    /// Principal is known but holds none of the required groups
    #[error("access denied")]
    Forbidden,

    /// Action name is not one the gate serves
    #[error("unknown action: {0}")]
    NotFound(String),

    /// Recognized action, wrong HTTP verb
    #[error("method {method} not allowed for {action}")]
    MethodNotAllowed {
        /// Action name
        action: String,
        /// Rejected HTTP method
        method: String,
        /// Methods the action accepts, as an `Allow` header value
        allowed: String,
    },

    /// Service credential could not be acquired
    #[error("credential error: {0}")]
    Credential(String),

    /// Directory answered with a non-success status
    #[error("directory query failed with status {status}")]
    DirectoryQuery {
        /// Upstream HTTP status
        status: u16,
        /// Upstream response body
        body: String,
    },

    /// Directory could not be reached (connect failure, timeout, bad payload)
    #[error("directory transport error: {0}")]
    DirectoryTransport(String),

    /// VM-control call failed
    #[error("upstream control error: status {status}")]
    UpstreamControl {
        /// Upstream HTTP status (0 when no response was received)
        status: u16,
        /// Upstream response body or transport error text
        body: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a directory call failing with this error may be attempted again
    ///
    /// Only rate limiting (429) and unavailability (503) qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DirectoryQuery {
                status: 429 | 503,
                ..
            }
        )
    }

    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::Credential(_)
            | Error::DirectoryQuery { .. }
            | Error::DirectoryTransport(_)
            | Error::UpstreamControl { .. }
            | Error::Config(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::DirectoryTransport(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Error::Credential(_) | Error::DirectoryQuery { .. } | Error::DirectoryTransport(_) => {
                error!(error = %self, "Membership resolution failed");
                serde_json::json!({ "success": false, "error": RESOLVER_UNAVAILABLE_MESSAGE })
            }
            Error::UpstreamControl { body, .. } => {
                error!(error = %self, "VM control call failed");
                serde_json::json!({
                    "success": false,
                    "error": self.to_string(),
                    "details": body,
                })
            }
            Error::Config(_) | Error::Internal(_) => {
                error!(error = %self, "Request failed");
                serde_json::json!({ "success": false, "error": "internal error" })
            }
            _ => serde_json::json!({ "success": false, "error": self.to_string() }),
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Error::MethodNotAllowed { allowed, .. } = &self {
            if let Ok(value) = HeaderValue::from_str(allowed) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}
