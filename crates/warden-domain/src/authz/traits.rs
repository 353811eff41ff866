//! Graph backend contract.

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{ObjectRef, RelationTuple, SubjectRef};
use crate::schema::AuthorizationSchema;

use super::types::RelationFilter;

/// Operations the services need from the relationship-graph backend.
///
/// Implementations classify failures into `NotFound`, `InvalidArgument`
/// and `Unavailable` and otherwise pass them through. Calls are cancelled by
/// dropping the returned future.
#[async_trait]
pub trait RelationAdapter: Send + Sync {
    /// Replaces the backend schema.
    async fn write_schema(&self, schema: &AuthorizationSchema) -> DomainResult<()>;

    /// Writes a tuple with touch semantics: an existing edge is not an error.
    async fn write(&self, tuple: &RelationTuple) -> DomainResult<()>;

    /// Deletes every tuple matching the filter.
    async fn delete(&self, filter: &RelationFilter) -> DomainResult<()>;

    /// Returns true when `subject` holds `permission` on `object`.
    async fn check(
        &self,
        subject: &SubjectRef,
        object: &ObjectRef,
        permission: &str,
    ) -> DomainResult<bool>;

    /// Reads tuples matching the filter.
    async fn list(&self, filter: &RelationFilter) -> DomainResult<Vec<RelationTuple>>;

    /// Ids of subjects in `subject_namespace` holding `permission` on `object`.
    async fn lookup_subjects(
        &self,
        object: &ObjectRef,
        permission: &str,
        subject_namespace: &str,
    ) -> DomainResult<Vec<String>>;

    /// Ids of objects in `namespace` on which `subject` holds `permission`.
    async fn lookup_resources(
        &self,
        namespace: &str,
        permission: &str,
        subject: &SubjectRef,
    ) -> DomainResult<Vec<String>>;
}
