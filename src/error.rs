use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::content_store::ContentStoreError;
use crate::crypto::CryptoError;
use crate::storage::DatabaseError;

/// Caller-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Conflict,
    NotFound,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("Content store error: {0}")]
    Store(#[from] ContentStoreError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReleaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReleaseError::BadRequest(_) => ErrorKind::BadRequest,
            ReleaseError::Unauthorized(_) => ErrorKind::Unauthorized,
            ReleaseError::Conflict(_) => ErrorKind::Conflict,
            ReleaseError::NotFound(_) => ErrorKind::NotFound,
            ReleaseError::Unavailable(_) => ErrorKind::Unavailable,
            ReleaseError::Store(ContentStoreError::NotFound(_)) => ErrorKind::NotFound,
            ReleaseError::Store(ContentStoreError::InvalidUri(_)) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;
