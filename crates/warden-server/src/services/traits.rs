use async_trait::async_trait;
use warden_domain::model::Resource;
use warden_domain::{DomainResult, ObjectRef, Principal};

use super::resource::CreateResource;

/// Maps the identity carried by a request to a principal.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Fails with `Unauthenticated` when the identity is unknown.
    async fn resolve_identity(&self, identity: &str) -> DomainResult<Principal>;
}

/// Answers permission checks for the enforcement chain.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `object.id` may be a canonical id or a slug.
    async fn check_authorization(
        &self,
        principal: Option<&Principal>,
        object: &ObjectRef,
        permission: &str,
    ) -> DomainResult<bool>;
}

/// Creates resources together with their ownership relations.
#[async_trait]
pub trait ResourceCreator: Send + Sync {
    async fn create_resource(
        &self,
        principal: &Principal,
        request: CreateResource,
    ) -> DomainResult<Resource>;
}
