//! Error types for plantdoc-core

use thiserror::Error;

/// Main error type for the plantdoc-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad input shape or range. Reported to the caller, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Caller does not own the requested data
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// External service exceeded its deadline
    #[error("{service} timed out")]
    UpstreamTimeout { service: &'static str },

    /// External service answered with an error or an unusable payload
    #[error(
        "{} error{}: {}",
        .service,
        .status.map(|s| format!(" ({})", s)).unwrap_or_default(),
        .message
    )]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// A blocking storage task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts and 5xx answers are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UpstreamTimeout { .. } => true,
            Error::Upstream {
                status: Some(status),
                ..
            } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the upstream rejected our credentials (bad or missing API key).
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::Upstream {
                status: Some(401) | Some(403),
                ..
            }
        )
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => format!("Invalid request: {}", msg),
            Error::NotFound { entity, .. } => format!("The requested {} was not found", entity),
            Error::NotAuthorized(_) => "Access denied".to_string(),
            Error::UpstreamTimeout { service } => {
                format!("The {} service took too long to answer; try again", service)
            }
            Error::Upstream { service, .. } if self.is_auth_failure() => {
                format!("The {} service rejected our API key", service)
            }
            Error::Upstream { service, .. } if self.is_retryable() => {
                format!("The {} service is unavailable; try again later", service)
            }
            Error::Upstream { service, .. } => {
                format!("The {} service could not process the request", service)
            }
            _ => "Internal error".to_string(),
        }
    }
}

/// Result type alias for plantdoc-core
pub type Result<T> = std::result::Result<T, Error>;
