use serde::{Deserialize, Serialize};
use std::error::Error as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarginError {
    #[error(transparent)]
    Note(#[from] crate::domain::NoteError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("domain '{domain}' is corrupted: {reason}")]
    Corruption { domain: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("search worker error: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("other error: {0}")]
    Other(String),
}

pub type MarginResult<T> = Result<T, MarginError>;

/// Coarse classification used by callers to pattern-match failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Storage,
    Validation,
    Corruption,
    Network,
    NotFound,
    Internal,
}

impl MarginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarginError::Note(_) | MarginError::Validation(_) | MarginError::Json(_) => {
                ErrorKind::Validation
            }
            MarginError::Storage(_) | MarginError::Io(_) | MarginError::Db(_) => ErrorKind::Storage,
            MarginError::Corruption { .. } => ErrorKind::Corruption,
            MarginError::Network(_) | MarginError::Http(_) => ErrorKind::Network,
            MarginError::NotFound(_) => ErrorKind::NotFound,
            MarginError::Worker(_) | MarginError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

/// Serializable failure payload handed to UI callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl From<&MarginError> for Failure {
    fn from(err: &MarginError) -> Self {
        Failure {
            kind: err.kind(),
            message: err.to_string(),
            cause: err.source().map(|source| source.to_string()),
        }
    }
}

/// `{ success, data, error }` wrapper for crossing a serialization boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl<T> From<MarginResult<T>> for OperationResult<T> {
    fn from(result: MarginResult<T>) -> Self {
        match result {
            Ok(data) => OperationResult {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => OperationResult {
                success: false,
                data: None,
                error: Some(Failure::from(&err)),
            },
        }
    }
}
