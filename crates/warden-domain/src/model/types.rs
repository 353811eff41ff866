//! Core type definitions for the authorization model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Well-known namespace identifiers.
pub mod namespaces {
    pub const USER: &str = "user";
    pub const ORGANIZATION: &str = "organization";
    pub const PROJECT: &str = "project";
    pub const GROUP: &str = "group";
}

/// Well-known relation names written by the services.
pub mod relations {
    pub const OWNER: &str = "owner";
    pub const PROJECT: &str = "project";
    pub const ORGANIZATION: &str = "organization";
    pub const MEMBER: &str = "member";
}

/// Subject relation meaning "the object itself".
pub const ELLIPSIS: &str = "...";

/// Normalizes an identifier for the schema language (`-` becomes `_`).
pub fn normalize(id: &str) -> String {
    id.replace('-', "_")
}

/// Returns true when `value` is a canonical (UUID) identifier rather than a slug.
pub fn is_canonical_id(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}

/// Builds the namespace id for a resource type declared under a backend.
pub fn resource_namespace(backend: &str, resource_type: Option<&str>) -> String {
    match resource_type {
        Some(kind) if !kind.is_empty() => format!("{backend}/{kind}"),
        _ => backend.to_string(),
    }
}

/// A declared resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Namespace {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A role: a named membership relation with its allowed subject types.
///
/// `namespace_id` names the namespace whose definition holds the membership
/// relation. When it is `None` the role belongs to the namespace it is
/// attached to through a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "namespace")]
    pub namespace_id: Option<String>,
    /// Subject types, either `namespace` or `namespace#relation`.
    #[serde(default)]
    pub types: Vec<String>,
}

impl Role {
    pub fn new(id: impl Into<String>, types: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            namespace_id: None,
            types,
        }
    }

    pub fn with_namespace(mut self, namespace_id: impl Into<String>) -> Self {
        self.namespace_id = Some(namespace_id.into());
        self
    }

    /// The namespace holding this role, falling back to `owner`.
    pub fn namespace_or<'a>(&'a self, owner: &'a str) -> &'a str {
        match self.namespace_id.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => owner,
        }
    }
}

/// An operation name scoped to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "namespace")]
    pub namespace_id: String,
}

impl Permission {
    pub fn new(id: impl Into<String>, namespace_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            namespace_id: namespace_id.into(),
        }
    }
}

/// A stored policy: ids only, resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub namespace_id: String,
    pub role_id: String,
    pub permission_id: String,
}

/// A resolved policy: compiler input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub namespace_id: String,
    pub role: Role,
    pub permission: Permission,
}

impl Policy {
    pub fn new(namespace_id: impl Into<String>, role: Role, permission: Permission) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            role,
            permission,
        }
    }
}

/// A graph node: `namespace:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub id: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Parses an object from `namespace:id` format.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let (namespace, id) = value.split_once(':').ok_or_else(|| {
            DomainError::invalid_argument(format!(
                "object '{value}' must be in 'namespace:id' format"
            ))
        })?;
        if namespace.is_empty() || id.is_empty() {
            return Err(DomainError::invalid_argument(format!(
                "object '{value}' has an empty namespace or id"
            )));
        }
        Ok(Self::new(namespace, id))
    }

    /// The object as named in the published schema. Ids are kept verbatim.
    pub fn normalized(&self) -> Self {
        Self::new(normalize(&self.namespace), &self.id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// The subject side of a tuple: an object, optionally narrowed to one of its relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub namespace: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
            relation: None,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Parses `namespace:id` or `namespace:id#relation`.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let (object, relation) = match value.split_once('#') {
            Some((object, relation)) if !relation.is_empty() => (object, Some(relation)),
            Some(_) => {
                return Err(DomainError::invalid_argument(format!(
                    "subject '{value}' has an empty relation"
                )))
            }
            None => (value, None),
        };
        let object = ObjectRef::parse(object).map_err(|_| {
            DomainError::invalid_argument(format!(
                "subject '{value}' must be in 'namespace:id' format"
            ))
        })?;
        Ok(Self {
            namespace: object.namespace,
            id: object.id,
            relation: relation.map(str::to_string),
        })
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.namespace, &self.id)
    }

    /// True when the subject denotes the object itself (no relation or `...`).
    pub fn is_direct(&self) -> bool {
        matches!(self.relation.as_deref(), None | Some(ELLIPSIS))
    }

    /// Namespace and relation as named in the published schema.
    pub fn normalized(&self) -> Self {
        Self {
            namespace: normalize(&self.namespace),
            id: self.id.clone(),
            relation: self.relation.as_deref().map(normalize),
        }
    }
}

impl From<&Principal> for SubjectRef {
    fn from(principal: &Principal) -> Self {
        SubjectRef::new(&principal.namespace, &principal.id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}:{}#{}", self.namespace, self.id, relation),
            None => write!(f, "{}:{}", self.namespace, self.id),
        }
    }
}

/// A graph edge `(object, relation, subject)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl RelationTuple {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }

    pub fn normalized(&self) -> Self {
        Self::new(
            self.object.normalized(),
            normalize(&self.relation),
            self.subject.normalized(),
        )
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: namespaces::USER.to_string(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_parse() {
        let object = ObjectRef::parse("project:foo").unwrap();
        assert_eq!(object.namespace, "project");
        assert_eq!(object.id, "foo");
        assert_eq!(object.to_string(), "project:foo");
    }

    #[test]
    fn test_object_parse_rejects_missing_separator() {
        assert!(ObjectRef::parse("project").is_err());
        assert!(ObjectRef::parse(":foo").is_err());
        assert!(ObjectRef::parse("project:").is_err());
    }

    #[test]
    fn test_subject_parse_with_relation() {
        let subject = SubjectRef::parse("group:eng#member").unwrap();
        assert_eq!(subject.namespace, "group");
        assert_eq!(subject.id, "eng");
        assert_eq!(subject.relation.as_deref(), Some("member"));
        assert!(!subject.is_direct());
        assert_eq!(subject.to_string(), "group:eng#member");
    }

    #[test]
    fn test_subject_parse_rejects_bare_id() {
        let err = SubjectRef::parse("alice").unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));
        assert!(SubjectRef::parse("group:eng#").is_err());
    }

    #[test]
    fn test_normalize_replaces_hyphens() {
        assert_eq!(normalize("project-1-1"), "project_1_1");
        assert_eq!(normalize("project-admin"), "project_admin");
    }

    #[test]
    fn test_canonical_id_detection() {
        assert!(is_canonical_id("0b3a5b0e-6f6a-4b1e-9d55-1d1b9f2a3c4d"));
        assert!(!is_canonical_id("foo"));
    }

    #[test]
    fn test_resource_namespace() {
        assert_eq!(resource_namespace("entropy", Some("firehose")), "entropy/firehose");
        assert_eq!(resource_namespace("entropy", None), "entropy");
        assert_eq!(resource_namespace("entropy", Some("")), "entropy");
    }

    #[test]
    fn test_role_namespace_fallback() {
        let local = Role::new("admin", vec!["user".to_string()]);
        assert_eq!(local.namespace_or("doc"), "doc");
        let foreign = local.clone().with_namespace("project");
        assert_eq!(foreign.namespace_or("doc"), "project");
    }
}
