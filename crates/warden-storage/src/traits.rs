//! Repository trait definitions.
//!
//! One narrow trait per entity. Implementations must be thread-safe and
//! treat slugs (and emails, urns) as unique secondary keys.

use std::sync::Arc;

use async_trait::async_trait;
use warden_domain::model::{
    Group, Organization, Project, RelationRecord, Resource, Role, User,
};
use warden_domain::{RelationFilter, RelationTuple};

use crate::error::StorageResult;

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> StorageResult<Organization>;
    async fn get_by_slug(&self, slug: &str) -> StorageResult<Organization>;
    /// Creates an organization, assigning an id when empty.
    async fn create(&self, organization: Organization) -> StorageResult<Organization>;
    async fn list(&self) -> StorageResult<Vec<Organization>>;
    async fn update_by_id(&self, organization: Organization) -> StorageResult<Organization>;
    async fn update_by_slug(&self, organization: Organization) -> StorageResult<Organization>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> StorageResult<Project>;
    async fn get_by_slug(&self, slug: &str) -> StorageResult<Project>;
    async fn create(&self, project: Project) -> StorageResult<Project>;
    async fn list(&self) -> StorageResult<Vec<Project>>;
    async fn update_by_id(&self, project: Project) -> StorageResult<Project>;
    async fn update_by_slug(&self, project: Project) -> StorageResult<Project>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> StorageResult<Group>;
    async fn get_by_slug(&self, slug: &str) -> StorageResult<Group>;
    async fn create(&self, group: Group) -> StorageResult<Group>;
    async fn list(&self) -> StorageResult<Vec<Group>>;
    async fn update_by_id(&self, group: Group) -> StorageResult<Group>;
    async fn update_by_slug(&self, group: Group) -> StorageResult<Group>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> StorageResult<User>;
    async fn get_by_email(&self, email: &str) -> StorageResult<User>;
    async fn create(&self, user: User) -> StorageResult<User>;
    async fn list(&self) -> StorageResult<Vec<User>>;
}

/// Filter for listing resources; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub namespace_id: Option<String>,
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
    pub owner_user_id: Option<String>,
}

impl ResourceFilter {
    pub fn matches(&self, resource: &Resource) -> bool {
        fn check(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }
        check(&self.namespace_id, &resource.namespace_id)
            && check(&self.organization_id, &resource.organization_id)
            && check(&self.project_id, &resource.project_id)
            && check(&self.owner_user_id, &resource.owner_user_id)
    }
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> StorageResult<Resource>;
    async fn get_by_urn(&self, urn: &str) -> StorageResult<Resource>;
    /// Upserts by urn: an existing row keeps its id and creation time.
    async fn create(&self, resource: Resource) -> StorageResult<Resource>;
    async fn list(&self, filter: &ResourceFilter) -> StorageResult<Vec<Resource>>;
    async fn update_by_id(&self, resource: Resource) -> StorageResult<Resource>;
    async fn delete_by_id(&self, id: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn get_by_id(&self, namespace_id: &str, id: &str) -> StorageResult<Role>;
    async fn create(&self, role: Role) -> StorageResult<Role>;
    /// Creates or replaces the role.
    async fn upsert(&self, role: Role) -> StorageResult<Role>;
    async fn list(&self) -> StorageResult<Vec<Role>>;
    async fn update_by_id(&self, role: Role) -> StorageResult<Role>;
}

/// Metadata copy of graph edges.
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Records a tuple; recording an existing tuple returns the stored row.
    async fn create(&self, tuple: &RelationTuple) -> StorageResult<RelationRecord>;
    async fn get_by_id(&self, id: &str) -> StorageResult<RelationRecord>;
    async fn list(&self, filter: &RelationFilter) -> StorageResult<Vec<RelationRecord>>;
    /// Deletes all matching rows, returning how many were removed.
    async fn delete(&self, filter: &RelationFilter) -> StorageResult<usize>;
}

/// Raw rule documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Keys of all documents, sorted.
    async fn list(&self) -> StorageResult<Vec<String>>;
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;
}

/// The full set of metadata repositories consumed by the services.
#[derive(Clone)]
pub struct Repositories {
    pub organizations: Arc<dyn OrganizationRepository>,
    pub projects: Arc<dyn ProjectRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub users: Arc<dyn UserRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub relations: Arc<dyn RelationRepository>,
}
