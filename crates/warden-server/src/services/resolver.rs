//! Bridges human-facing identifiers and the relation graph.
//!
//! Clients address organizations, projects and groups either by canonical id
//! or by slug. Checks always reach the graph backend with canonical ids.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use warden_domain::model::{is_canonical_id, namespaces, Group, Organization, Project};
use warden_domain::{DomainError, DomainResult, ObjectRef, Principal, RelationAdapter, SubjectRef};
use warden_storage::Repositories;

use super::traits::Authorizer;

pub struct PermissionResolver {
    repositories: Repositories,
    adapter: Arc<dyn RelationAdapter>,
}

impl PermissionResolver {
    pub fn new(repositories: Repositories, adapter: Arc<dyn RelationAdapter>) -> Self {
        Self {
            repositories,
            adapter,
        }
    }

    pub async fn get_organization(&self, id_or_slug: &str) -> DomainResult<Organization> {
        let organizations = &self.repositories.organizations;
        let found = if is_canonical_id(id_or_slug) {
            organizations.get_by_id(id_or_slug).await
        } else {
            organizations.get_by_slug(id_or_slug).await
        };
        Ok(found?)
    }

    pub async fn get_project(&self, id_or_slug: &str) -> DomainResult<Project> {
        let projects = &self.repositories.projects;
        let found = if is_canonical_id(id_or_slug) {
            projects.get_by_id(id_or_slug).await
        } else {
            projects.get_by_slug(id_or_slug).await
        };
        Ok(found?)
    }

    pub async fn get_group(&self, id_or_slug: &str) -> DomainResult<Group> {
        let groups = &self.repositories.groups;
        let found = if is_canonical_id(id_or_slug) {
            groups.get_by_id(id_or_slug).await
        } else {
            groups.get_by_slug(id_or_slug).await
        };
        Ok(found?)
    }

    /// Rewrites a slug-addressed object to its canonical id. Objects outside
    /// the slugged namespaces are returned unchanged.
    pub async fn resolve_object(&self, object: &ObjectRef) -> DomainResult<ObjectRef> {
        if object.id.is_empty() {
            return Err(DomainError::invalid_argument(format!(
                "object '{object}' has an empty id"
            )));
        }
        if is_canonical_id(&object.id) {
            return Ok(object.clone());
        }

        let id = match object.namespace.as_str() {
            namespaces::PROJECT => self.get_project(&object.id).await?.id,
            namespaces::ORGANIZATION => self.get_organization(&object.id).await?.id,
            namespaces::GROUP => self.get_group(&object.id).await?.id,
            _ => return Ok(object.clone()),
        };
        debug!(namespace = %object.namespace, slug = %object.id, %id, "resolved slug");
        Ok(ObjectRef::new(&object.namespace, id))
    }
}

#[async_trait]
impl Authorizer for PermissionResolver {
    #[instrument(skip(self, principal), fields(principal = principal.map(|p| p.id.as_str())))]
    async fn check_authorization(
        &self,
        principal: Option<&Principal>,
        object: &ObjectRef,
        permission: &str,
    ) -> DomainResult<bool> {
        let principal = principal
            .ok_or_else(|| DomainError::unauthenticated("no principal in request context"))?;
        let object = self.resolve_object(object).await?;
        let allowed = self
            .adapter
            .check(&SubjectRef::from(principal), &object, permission)
            .await?;
        debug!(%object, permission, allowed, "checked authorization");
        Ok(allowed)
    }
}
