//! Error translation for the admin API and the proxy.
//!
//! [`ErrorConfig`] controls whether client-facing messages carry identifiers
//! (slugs, urns, relation names) or generic text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use warden_domain::{DomainError, ErrorKind};

/// Detail level of error messages returned to clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorConfig {
    pub detailed_errors: bool,
}

impl ErrorConfig {
    /// Generic messages only.
    pub fn production() -> Self {
        Self {
            detailed_errors: false,
        }
    }

    pub fn development() -> Self {
        Self {
            detailed_errors: true,
        }
    }
}

/// JSON error body: `{"code": "...", "message": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission_denied", message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("request body exceeds {limit} bytes"),
        )
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "bad_gateway", message)
    }

    /// Maps a domain error for the admin API.
    pub fn from_domain(err: &DomainError, config: &ErrorConfig) -> Self {
        let (status, code) = status_for_kind(err.kind());
        let message = if config.detailed_errors {
            err.to_string()
        } else {
            generic_message(err.kind()).to_string()
        };
        Self::new(status, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::from_domain(&err, &ErrorConfig::production())
    }
}

pub fn status_for_kind(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::InvalidArgument => (StatusCode::BAD_REQUEST, "invalid_argument"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorKind::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        ErrorKind::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied"),
        ErrorKind::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn generic_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidArgument => "invalid request",
        ErrorKind::NotFound => "not found",
        ErrorKind::Conflict => "already exists",
        ErrorKind::Unauthenticated => "unauthenticated",
        ErrorKind::PermissionDenied => "permission denied",
        ErrorKind::Unavailable => "service unavailable",
        ErrorKind::Internal => "internal error",
    }
}

/// Status returned by the proxy when the authorization stage fails with an
/// error rather than a negative answer. Anything but a missing object or an
/// explicit denial is reported as unauthenticated.
pub fn proxy_denial(err: &DomainError, config: &ErrorConfig) -> ApiError {
    let message = if config.detailed_errors {
        err.to_string()
    } else {
        generic_message(err.kind()).to_string()
    };
    match err.kind() {
        ErrorKind::NotFound => ApiError::not_found(message),
        ErrorKind::PermissionDenied => ApiError::forbidden(message),
        _ => ApiError::unauthenticated(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_hides_identifiers() {
        let err = DomainError::not_found("project", "secret-project");
        let api = ApiError::from_domain(&err, &ErrorConfig::production());
        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert!(!api.message.contains("secret-project"));

        let api = ApiError::from_domain(&err, &ErrorConfig::development());
        assert!(api.message.contains("secret-project"));
    }

    #[test]
    fn test_schema_compile_is_bad_request() {
        let err = DomainError::schema_compile("unknown role");
        let api = ApiError::from_domain(&err, &ErrorConfig::production());
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "invalid_argument");
    }

    #[test]
    fn test_proxy_denial_mapping() {
        let config = ErrorConfig::production();
        assert_eq!(
            proxy_denial(&DomainError::not_found("project", "x"), &config).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            proxy_denial(
                &DomainError::PermissionDenied {
                    message: "no".to_string()
                },
                &config
            )
            .status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            proxy_denial(&DomainError::unavailable("spicedb down"), &config).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            proxy_denial(&DomainError::invalid_argument("empty id"), &config).status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_error_body_shape() {
        let api = ApiError::bad_gateway("upstream unreachable");
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["code"], "bad_gateway");
        assert_eq!(json["message"], "upstream unreachable");
        assert!(json.get("status").is_none());
    }
}
