//! Storage error types.

use thiserror::Error;
use warden_domain::DomainError;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Row not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique id, slug or urn already taken.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Backing store could not be reached.
    #[error("storage connection error: {message}")]
    ConnectionError { message: String },

    /// Blob read failure.
    #[error("blob error for '{key}': {message}")]
    BlobError { key: String, message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => DomainError::not_found(entity, id),
            StorageError::AlreadyExists { entity, id } => DomainError::conflict(entity, id),
            StorageError::InvalidInput { message } => DomainError::invalid_argument(message),
            StorageError::ConnectionError { message } => DomainError::unavailable(message),
            other => DomainError::internal(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::ErrorKind;

    #[test]
    fn test_conversion_preserves_classification() {
        let err: DomainError = StorageError::not_found("project", "foo").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: DomainError = StorageError::already_exists("organization", "acme").into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: DomainError = StorageError::ConnectionError {
            message: "refused".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
