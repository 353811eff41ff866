//! Hierarchical resource creation.
//!
//! Creating a resource persists the row (upserted by URN), clears stale
//! relations on the resource object, then writes the project relation and
//! the owner relation, in that order. Relation writes are not rolled back:
//! a failure is returned to the caller and the whole call can be retried,
//! since the row upsert and the relation writes are idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};
use warden_domain::model::{namespaces, relations, Resource};
use warden_domain::{
    DomainError, DomainResult, Principal, RelationFilter, RelationTuple, SubjectRef,
};
use warden_storage::{ResourceFilter, ResourceRepository};

use super::relation::RelationService;
use super::resolver::PermissionResolver;
use super::traits::ResourceCreator;

/// Input of [`ResourceService::create`]. Project, organization and group
/// accept ids or slugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResource {
    pub name: String,
    pub namespace_id: String,
    pub project: String,
    pub organization: Option<String>,
    pub group: Option<String>,
}

pub struct ResourceService {
    resources: Arc<dyn ResourceRepository>,
    resolver: Arc<PermissionResolver>,
    relations: Arc<RelationService>,
}

impl ResourceService {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        resolver: Arc<PermissionResolver>,
        relations: Arc<RelationService>,
    ) -> Self {
        Self {
            resources,
            resolver,
            relations,
        }
    }

    #[instrument(skip(self, principal), fields(user = %principal.id))]
    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateResource,
    ) -> DomainResult<Resource> {
        if request.name.trim().is_empty() {
            return Err(DomainError::invalid_argument("resource name cannot be empty"));
        }
        if request.namespace_id.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "resource namespace cannot be empty",
            ));
        }

        let project = self.resolver.get_project(&request.project).await?;
        if let Some(organization) = request.organization.as_deref() {
            let organization = self.resolver.get_organization(organization).await?;
            if organization.id != project.organization_id {
                return Err(DomainError::invalid_argument(format!(
                    "project '{}' does not belong to organization '{}'",
                    project.slug, organization.slug
                )));
            }
        }
        let group_id = match request.group.as_deref() {
            Some(group) => Some(self.resolver.get_group(group).await?.id),
            None => None,
        };

        let now = Utc::now();
        let resource = self
            .resources
            .create(Resource {
                id: String::new(),
                urn: Resource::create_urn(&request.namespace_id, &project.id, &request.name),
                name: request.name,
                namespace_id: request.namespace_id,
                organization_id: project.organization_id.clone(),
                project_id: project.id.clone(),
                group_id,
                owner_user_id: principal.id.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let object = resource.object();
        self.relations
            .delete(&RelationFilter::object(&object))
            .await?;
        self.relations
            .create(&RelationTuple::new(
                object.clone(),
                relations::PROJECT,
                SubjectRef::new(namespaces::PROJECT, &project.id),
            ))
            .await?;
        self.relations
            .create(&RelationTuple::new(
                object,
                relations::OWNER,
                SubjectRef::from(principal),
            ))
            .await?;

        info!(urn = %resource.urn, id = %resource.id, "created resource");
        Ok(resource)
    }

    pub async fn get(&self, id_or_urn: &str) -> DomainResult<Resource> {
        let found = if id_or_urn.starts_with("r/") {
            self.resources.get_by_urn(id_or_urn).await
        } else {
            self.resources.get_by_id(id_or_urn).await
        };
        Ok(found?)
    }

    pub async fn list(&self, filter: &ResourceFilter) -> DomainResult<Vec<Resource>> {
        Ok(self.resources.list(filter).await?)
    }

    /// Removes the resource's relations, then the row.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> DomainResult<()> {
        let resource = self.resources.get_by_id(id).await?;
        self.relations
            .delete(&RelationFilter::object(&resource.object()))
            .await?;
        self.resources.delete_by_id(id).await?;
        info!(urn = %resource.urn, "deleted resource");
        Ok(())
    }
}

#[async_trait]
impl ResourceCreator for ResourceService {
    async fn create_resource(
        &self,
        principal: &Principal,
        request: CreateResource,
    ) -> DomainResult<Resource> {
        self.create(principal, request).await
    }
}
