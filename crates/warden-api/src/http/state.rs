//! Shared state of the admin API handlers.

use std::sync::Arc;

use axum::http::HeaderName;
use warden_domain::{AuthorizationSchema, DomainError, RelationAdapter};
use warden_server::{Authorizer, PrincipalResolver, RelationService, ResourceService};

use crate::errors::{ApiError, ErrorConfig};

#[derive(Clone)]
pub struct AppState {
    /// Schema published at startup.
    pub schema: Arc<AuthorizationSchema>,
    pub adapter: Arc<dyn RelationAdapter>,
    pub principals: Arc<dyn PrincipalResolver>,
    pub authorizer: Arc<dyn Authorizer>,
    pub relations: Arc<RelationService>,
    pub resources: Arc<ResourceService>,
    /// Header carrying the caller's identity (email).
    pub identity_header: HeaderName,
    pub errors: ErrorConfig,
}

impl AppState {
    pub fn error(&self, err: DomainError) -> ApiError {
        ApiError::from_domain(&err, &self.errors)
    }
}
