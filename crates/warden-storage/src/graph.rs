//! In-process relationship-graph backend.
//!
//! Tuples are grouped per object namespace in a `HashSet`, so writing an
//! existing edge is a no-op. Checks are evaluated against the last schema
//! written, which is swapped atomically on `write_schema`. Namespaces and
//! relation names are normalized on entry to match the compiled schema.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};
use warden_domain::authz::{Evaluator, EvaluatorConfig, TupleSource};
use warden_domain::model::{normalize, ELLIPSIS};
use warden_domain::schema::{AuthorizationSchema, Member};
use warden_domain::{
    DomainError, DomainResult, ObjectRef, RelationAdapter, RelationFilter, RelationTuple,
    SubjectRef,
};

/// Tuples keyed by object namespace.
#[derive(Debug, Default)]
pub struct TupleIndex {
    tuples: DashMap<String, HashSet<RelationTuple>>,
}

impl TupleIndex {
    fn matching(&self, filter: &RelationFilter) -> Vec<RelationTuple> {
        let mut found: Vec<RelationTuple> = self
            .tuples
            .get(&filter.namespace)
            .map(|set| set.iter().filter(|t| filter.matches(t)).cloned().collect())
            .unwrap_or_default();
        found.sort();
        found
    }
}

#[async_trait]
impl TupleSource for TupleIndex {
    async fn read_subjects(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> DomainResult<Vec<SubjectRef>> {
        Ok(self
            .tuples
            .get(&object.namespace)
            .map(|set| {
                set.iter()
                    .filter(|t| t.object == *object && t.relation == relation)
                    .map(|t| t.subject.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Relation adapter backed by process memory.
pub struct MemoryRelationStore {
    index: Arc<TupleIndex>,
    schema: ArcSwapOption<AuthorizationSchema>,
    evaluator: Evaluator<TupleIndex>,
}

impl Default for MemoryRelationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::with_config(EvaluatorConfig::default())
    }

    pub fn with_config(config: EvaluatorConfig) -> Self {
        let index = Arc::new(TupleIndex::default());
        Self {
            evaluator: Evaluator::with_config(Arc::clone(&index), config),
            index,
            schema: ArcSwapOption::empty(),
        }
    }

    /// Creates a new store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn current_schema(&self) -> DomainResult<Arc<AuthorizationSchema>> {
        self.schema
            .load_full()
            .ok_or_else(|| DomainError::invalid_argument("no schema has been written"))
    }

    /// Rejects tuples whose relation or subject type the schema does not allow.
    fn validate(&self, schema: &AuthorizationSchema, tuple: &RelationTuple) -> DomainResult<()> {
        let definition = schema
            .definition(&tuple.object.namespace)
            .ok_or_else(|| DomainError::not_found("definition", &tuple.object.namespace))?;

        let relation = match definition.member(&tuple.relation) {
            Some(Member::Relation(relation)) => relation,
            Some(Member::Permission(_)) => {
                return Err(DomainError::invalid_argument(format!(
                    "cannot write to permission '{}' of '{}'",
                    tuple.relation, tuple.object.namespace
                )))
            }
            None => {
                return Err(DomainError::invalid_argument(format!(
                    "relation '{}' not found on '{}'",
                    tuple.relation, tuple.object.namespace
                )))
            }
        };

        let subject_relation = tuple
            .subject
            .relation
            .as_deref()
            .filter(|rel| *rel != ELLIPSIS);
        let allowed = relation.types.iter().any(|allowed| {
            allowed.namespace == tuple.subject.namespace
                && allowed.relation.as_deref() == subject_relation
        });
        if !allowed {
            return Err(DomainError::invalid_argument(format!(
                "subject type '{}' is not allowed on {}#{}",
                tuple.subject.namespace, tuple.object.namespace, tuple.relation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RelationAdapter for MemoryRelationStore {
    async fn write_schema(&self, schema: &AuthorizationSchema) -> DomainResult<()> {
        self.schema.store(Some(Arc::new(schema.clone())));
        debug!(definitions = schema.len(), "schema written");
        Ok(())
    }

    #[instrument(skip(self, tuple), fields(tuple = %tuple))]
    async fn write(&self, tuple: &RelationTuple) -> DomainResult<()> {
        let schema = self.current_schema()?;
        let tuple = &tuple.normalized();
        self.validate(&schema, tuple)?;
        self.index
            .tuples
            .entry(tuple.object.namespace.clone())
            .or_default()
            .insert(tuple.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, filter: &RelationFilter) -> DomainResult<()> {
        let filter = &filter.normalized();
        let removed = match self.index.tuples.get_mut(&filter.namespace) {
            Some(mut set) => {
                let before = set.len();
                set.retain(|t| !filter.matches(t));
                before - set.len()
            }
            None => 0,
        };
        if removed == 0 {
            return Err(DomainError::not_found("relation", format!("{filter:?}")));
        }
        Ok(())
    }

    async fn check(
        &self,
        subject: &SubjectRef,
        object: &ObjectRef,
        permission: &str,
    ) -> DomainResult<bool> {
        let schema = self.current_schema()?;
        self.evaluator
            .check(
                &schema,
                &subject.normalized(),
                &object.normalized(),
                &normalize(permission),
            )
            .await
    }

    async fn list(&self, filter: &RelationFilter) -> DomainResult<Vec<RelationTuple>> {
        Ok(self.index.matching(&filter.normalized()))
    }

    async fn lookup_subjects(
        &self,
        object: &ObjectRef,
        permission: &str,
        subject_namespace: &str,
    ) -> DomainResult<Vec<String>> {
        let schema = self.current_schema()?;
        let object = &object.normalized();
        let permission = normalize(permission);
        let subject_namespace = normalize(subject_namespace);
        let candidates: BTreeSet<String> = self
            .index
            .tuples
            .iter()
            .flat_map(|set| {
                set.value()
                    .iter()
                    .filter(|t| t.subject.namespace == subject_namespace && t.subject.is_direct())
                    .map(|t| t.subject.id.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut found = Vec::new();
        for id in candidates {
            let subject = SubjectRef::new(&subject_namespace, &id);
            if self.evaluator.check(&schema, &subject, object, &permission).await? {
                found.push(id);
            }
        }
        Ok(found)
    }

    async fn lookup_resources(
        &self,
        namespace: &str,
        permission: &str,
        subject: &SubjectRef,
    ) -> DomainResult<Vec<String>> {
        let schema = self.current_schema()?;
        let namespace = normalize(namespace);
        let permission = normalize(permission);
        let subject = &subject.normalized();
        let candidates: BTreeSet<String> = self
            .index
            .matching(&RelationFilter::namespace(&namespace))
            .into_iter()
            .map(|t| t.object.id)
            .collect();

        let mut found = Vec::new();
        for id in candidates {
            let object = ObjectRef::new(&namespace, &id);
            if self.evaluator.check(&schema, subject, &object, &permission).await? {
                found.push(id);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::model::{Permission, Policy, Role};
    use warden_domain::{compile, ErrorKind, SubjectFilter};

    fn schema() -> AuthorizationSchema {
        let owner = Role::new("owner", vec!["user".to_string()]);
        let project_owner = owner.clone().with_namespace("project");
        compile(&[
            Policy::new("project", owner.clone(), Permission::new("read", "project")),
            Policy::new("doc", owner, Permission::new("read", "doc")),
            Policy::new("doc", project_owner, Permission::new("read", "doc")),
        ])
        .unwrap()
    }

    fn tuple(object: &str, relation: &str, subject: &str) -> RelationTuple {
        RelationTuple::new(
            ObjectRef::parse(object).unwrap(),
            relation,
            SubjectRef::parse(subject).unwrap(),
        )
    }

    async fn store() -> MemoryRelationStore {
        let store = MemoryRelationStore::new();
        store.write_schema(&schema()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let store = store().await;
        let t = tuple("doc:1", "owner", "user:alice");
        store.write(&t).await.unwrap();
        store.write(&t).await.unwrap();

        let listed = store.list(&RelationFilter::object(&t.object)).await.unwrap();
        assert_eq!(listed, vec![t]);
    }

    #[tokio::test]
    async fn test_write_requires_schema() {
        let store = MemoryRelationStore::new();
        let err = store
            .write(&tuple("doc:1", "owner", "user:alice"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_write_validates_relation_and_subject_type() {
        let store = store().await;

        let err = store.write(&tuple("doc:1", "editor", "user:alice")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = store.write(&tuple("doc:1", "read", "user:alice")).await.unwrap_err();
        assert!(err.to_string().contains("permission"));

        let err = store.write(&tuple("doc:1", "owner", "project:p1")).await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));

        let err = store.write(&tuple("widget:1", "owner", "user:alice")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_check_follows_project_ownership() {
        let store = store().await;
        store.write(&tuple("doc:1", "project", "project:p1")).await.unwrap();
        store.write(&tuple("project:p1", "owner", "user:carol")).await.unwrap();

        let doc = ObjectRef::new("doc", "1");
        assert!(store.check(&SubjectRef::new("user", "carol"), &doc, "read").await.unwrap());
        assert!(!store.check(&SubjectRef::new("user", "dave"), &doc, "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_filter() {
        let store = store().await;
        store.write(&tuple("doc:1", "owner", "user:alice")).await.unwrap();
        store.write(&tuple("doc:1", "project", "project:p1")).await.unwrap();
        store.write(&tuple("doc:2", "owner", "user:alice")).await.unwrap();

        store
            .delete(&RelationFilter::object(&ObjectRef::new("doc", "1")))
            .await
            .unwrap();
        let remaining = store.list(&RelationFilter::namespace("doc")).await.unwrap();
        assert_eq!(remaining, vec![tuple("doc:2", "owner", "user:alice")]);
    }

    #[tokio::test]
    async fn test_delete_nothing_is_not_found() {
        let store = store().await;
        let filter = RelationFilter::namespace("doc").with_subject(SubjectFilter {
            namespace: "user".to_string(),
            id: Some("ghost".to_string()),
            relation: None,
        });
        let err = store.delete(&filter).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = store().await;
        store.write(&tuple("doc:1", "owner", "user:alice")).await.unwrap();
        store.write(&tuple("doc:2", "project", "project:p1")).await.unwrap();
        store.write(&tuple("project:p1", "owner", "user:alice")).await.unwrap();
        store.write(&tuple("doc:3", "owner", "user:bob")).await.unwrap();

        let alice = SubjectRef::new("user", "alice");
        let docs = store.lookup_resources("doc", "read", &alice).await.unwrap();
        assert_eq!(docs, vec!["1".to_string(), "2".to_string()]);

        let readers = store
            .lookup_subjects(&ObjectRef::new("doc", "3"), "read", "user")
            .await
            .unwrap();
        assert_eq!(readers, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_hyphenated_names_match_compiled_schema() {
        let store = MemoryRelationStore::new();
        let owner = Role::new("owner-role", vec!["user".to_string()]);
        let schema = compile(&[Policy::new(
            "data-store",
            owner,
            Permission::new("read-all", "data-store"),
        )])
        .unwrap();
        assert!(schema.definition("data_store").is_some());
        store.write_schema(&schema).await.unwrap();

        let t = tuple("data-store:r1", "owner-role", "user:u1");
        store.write(&t).await.unwrap();

        let object = ObjectRef::new("data-store", "r1");
        let user = SubjectRef::new("user", "u1");
        assert!(store.check(&user, &object, "read-all").await.unwrap());
        assert!(store.check(&user, &object, "read_all").await.unwrap());
        assert_eq!(
            store.lookup_resources("data-store", "read-all", &user).await.unwrap(),
            vec!["r1".to_string()]
        );
        assert_eq!(
            store.lookup_subjects(&object, "read-all", "user").await.unwrap(),
            vec!["u1".to_string()]
        );

        let listed = store.list(&RelationFilter::object(&object)).await.unwrap();
        assert_eq!(listed, vec![t.normalized()]);
        store.delete(&RelationFilter::tuple(&t)).await.unwrap();
        assert!(!store.check(&user, &object, "read-all").await.unwrap());
    }
}
