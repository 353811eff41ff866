use std::sync::Arc;

use tracing::{debug, instrument};
use warden_domain::model::RelationRecord;
use warden_domain::{
    DomainError, DomainResult, ObjectRef, RelationAdapter, RelationFilter, RelationTuple,
    SubjectRef,
};
use warden_storage::RelationRepository;

/// Parses the textual form of a tuple.
///
/// Subjects must be `namespace:id` or `namespace:id#relation`.
pub fn parse_tuple(object: &str, relation: &str, subject: &str) -> DomainResult<RelationTuple> {
    if relation.trim().is_empty() {
        return Err(DomainError::invalid_argument("relation cannot be empty"));
    }
    Ok(RelationTuple::new(
        ObjectRef::parse(object)?,
        relation,
        SubjectRef::parse(subject)?,
    ))
}

/// Writes relations to the graph backend and mirrors them into the
/// metadata store.
pub struct RelationService {
    records: Arc<dyn RelationRepository>,
    adapter: Arc<dyn RelationAdapter>,
}

impl RelationService {
    pub fn new(records: Arc<dyn RelationRepository>, adapter: Arc<dyn RelationAdapter>) -> Self {
        Self { records, adapter }
    }

    /// Idempotent: writing an existing edge returns the stored record.
    #[instrument(skip(self, tuple), fields(tuple = %tuple))]
    pub async fn create(&self, tuple: &RelationTuple) -> DomainResult<RelationRecord> {
        self.adapter.write(tuple).await?;
        Ok(self.records.create(tuple).await?)
    }

    /// Removes every matching edge. Matching nothing is not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, filter: &RelationFilter) -> DomainResult<()> {
        match self.adapter.delete(filter).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!("no relation matched the delete filter");
            }
            Err(err) => return Err(err),
        }
        let removed = self.records.delete(filter).await?;
        debug!(removed, "deleted relation records");
        Ok(())
    }

    pub async fn list(&self, filter: &RelationFilter) -> DomainResult<Vec<RelationRecord>> {
        Ok(self.records.list(filter).await?)
    }

    pub async fn check(
        &self,
        subject: &SubjectRef,
        object: &ObjectRef,
        permission: &str,
    ) -> DomainResult<bool> {
        self.adapter.check(subject, object, permission).await
    }
}
