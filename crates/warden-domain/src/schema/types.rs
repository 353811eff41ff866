//! Compiled schema structures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An allowed subject type on a relation: `namespace` or `namespace#relation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectType {
    pub namespace: String,
    pub relation: Option<String>,
}

impl SubjectType {
    pub fn parse(value: &str) -> Self {
        match value.split_once('#') {
            Some((namespace, relation)) if !relation.is_empty() => Self {
                namespace: namespace.to_string(),
                relation: Some(relation.to_string()),
            },
            Some((namespace, _)) => Self {
                namespace: namespace.to_string(),
                relation: None,
            },
            None => Self {
                namespace: value.to_string(),
                relation: None,
            },
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}#{}", self.namespace, relation),
            None => f.write_str(&self.namespace),
        }
    }
}

/// One operand of a permission union.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsersetRef {
    /// A relation on the same object.
    ComputedUserset { relation: String },
    /// Follow `tupleset` to another object, then resolve `computed` there.
    TupleToUserset { tupleset: String, computed: String },
}

impl fmt::Display for UsersetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComputedUserset { relation } => f.write_str(relation),
            Self::TupleToUserset { tupleset, computed } => write!(f, "{tupleset}->{computed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub types: Vec<SubjectType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub union: Vec<UsersetRef>,
}

/// A named relation or permission inside a definition.
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    Relation(&'a RelationDefinition),
    Permission(&'a PermissionDefinition),
}

/// Schema definition for a single namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub relations: Vec<RelationDefinition>,
    pub permissions: Vec<PermissionDefinition>,
}

impl Definition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDefinition> {
        self.permissions.iter().find(|p| p.name == name)
    }

    /// Looks up a relation or permission by name.
    pub fn member(&self, name: &str) -> Option<Member<'_>> {
        self.relation(name)
            .map(Member::Relation)
            .or_else(|| self.permission(name).map(Member::Permission))
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.permissions.is_empty()
    }
}

/// Compiler output: definitions ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorizationSchema {
    pub definitions: Vec<Definition>,
}

impl AuthorizationSchema {
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .binary_search_by(|d| d.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.definitions[idx])
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_type_parse() {
        let plain = SubjectType::parse("user");
        assert_eq!(plain.namespace, "user");
        assert!(plain.relation.is_none());

        let set = SubjectType::parse("group#member");
        assert_eq!(set.relation.as_deref(), Some("member"));
        assert_eq!(set.to_string(), "group#member");
    }

    #[test]
    fn test_member_lookup_prefers_relation() {
        let mut def = Definition::new("doc");
        def.relations.push(RelationDefinition {
            name: "owner".to_string(),
            types: vec![SubjectType::parse("user")],
        });
        def.permissions.push(PermissionDefinition {
            name: "read".to_string(),
            union: vec![UsersetRef::ComputedUserset {
                relation: "owner".to_string(),
            }],
        });
        assert!(matches!(def.member("owner"), Some(Member::Relation(_))));
        assert!(matches!(def.member("read"), Some(Member::Permission(_))));
        assert!(def.member("write").is_none());
    }
}
