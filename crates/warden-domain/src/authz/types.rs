//! Relationship filters.

use serde::{Deserialize, Serialize};

use crate::model::{normalize, ObjectRef, RelationTuple, SubjectRef};

/// Narrows the subject side of a [`RelationFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubjectFilter {
    pub namespace: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
}

impl SubjectFilter {
    pub fn matches(&self, subject: &SubjectRef) -> bool {
        subject.namespace == self.namespace
            && self.id.as_ref().map_or(true, |id| *id == subject.id)
            && self
                .relation
                .as_ref()
                .map_or(true, |rel| subject.relation.as_ref() == Some(rel))
    }
}

impl SubjectFilter {
    pub fn normalized(&self) -> Self {
        Self {
            namespace: normalize(&self.namespace),
            id: self.id.clone(),
            relation: self.relation.as_deref().map(normalize),
        }
    }
}

impl From<&SubjectRef> for SubjectFilter {
    fn from(subject: &SubjectRef) -> Self {
        Self {
            namespace: subject.namespace.clone(),
            id: Some(subject.id.clone()),
            relation: subject.relation.clone(),
        }
    }
}

/// Selects tuples by object namespace and optional id, relation and subject.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationFilter {
    pub namespace: String,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub subject: Option<SubjectFilter>,
}

impl RelationFilter {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// All tuples on one object.
    pub fn object(object: &ObjectRef) -> Self {
        Self {
            namespace: object.namespace.clone(),
            object_id: Some(object.id.clone()),
            ..Default::default()
        }
    }

    /// Exactly one tuple.
    pub fn tuple(tuple: &RelationTuple) -> Self {
        Self {
            namespace: tuple.object.namespace.clone(),
            object_id: Some(tuple.object.id.clone()),
            relation: Some(tuple.relation.clone()),
            subject: Some(SubjectFilter::from(&tuple.subject)),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_subject(mut self, subject: SubjectFilter) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Namespaces and relation names as named in the published schema.
    pub fn normalized(&self) -> Self {
        Self {
            namespace: normalize(&self.namespace),
            object_id: self.object_id.clone(),
            relation: self.relation.as_deref().map(normalize),
            subject: self.subject.as_ref().map(SubjectFilter::normalized),
        }
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        tuple.object.namespace == self.namespace
            && self
                .object_id
                .as_ref()
                .map_or(true, |id| *id == tuple.object.id)
            && self
                .relation
                .as_ref()
                .map_or(true, |rel| *rel == tuple.relation)
            && self
                .subject
                .as_ref()
                .map_or(true, |subject| subject.matches(&tuple.subject))
    }
}
