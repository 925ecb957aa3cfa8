use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid reference '{url}': {reason}")]
    InvalidReference { url: String, reason: String },

    #[error("authentication rejected by {service} (HTTP {status}): {message}")]
    Auth {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("not found: {what}: {message}")]
    NotFound { what: String, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{operation} is not supported for {kind} references")]
    UnsupportedKind {
        operation: &'static str,
        kind: &'static str,
    },

    #[error("{service} returned HTTP {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn invalid_reference(url: &str, reason: impl Into<String>) -> Self {
        SyncError::InvalidReference {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
