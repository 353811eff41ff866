//! Domain error types for authorization operations.

use thiserror::Error;

/// Domain-specific errors for authorization operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed identifier, subject, or request body.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Object, namespace, role, or permission could not be found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Duplicate slug, name, or id.
    #[error("{kind} already exists: {id}")]
    Conflict { kind: String, id: String },

    /// No principal could be resolved for the caller.
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// The permission check returned false.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The metadata store or graph backend could not be reached.
    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    /// Unexpected failure.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Policy set could not be compiled into a schema.
    #[error("schema compilation failed: {message}")]
    SchemaCompile { message: String },

    /// Depth limit exceeded during graph traversal.
    #[error("depth limit exceeded (max: {max_depth})")]
    DepthLimitExceeded { max_depth: u32 },

    /// Cycle detected in relation graph.
    #[error("cycle detected in relation graph: {path}")]
    CycleDetected { path: String },
}

/// Protocol-agnostic classification of a [`DomainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Unauthenticated,
    PermissionDenied,
    Unavailable,
    Internal,
}

impl DomainError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn schema_compile(message: impl Into<String>) -> Self {
        Self::SchemaCompile {
            message: message.into(),
        }
    }

    /// Classifies the error for translation into protocol status codes.
    ///
    /// Compile errors are invalid input; traversal limits surface as internal
    /// errors since the caller cannot fix them.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::SchemaCompile { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Internal { .. }
            | Self::DepthLimitExceeded { .. }
            | Self::CycleDetected { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            DomainError::not_found("project", "foo").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DomainError::schema_compile("bad").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            DomainError::CycleDetected {
                path: "a".to_string()
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = DomainError::not_found("project", "foo");
        assert_eq!(err.to_string(), "project not found: foo");
        assert!(err.is_not_found());
    }
}
