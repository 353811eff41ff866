//! Policy set to schema compiler.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::model::{namespaces, normalize, Policy};

use super::types::{
    AuthorizationSchema, Definition, PermissionDefinition, RelationDefinition, SubjectType,
    UsersetRef,
};

/// Policies sharing this key inside one namespace merge into a single role entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RoleKey {
    role_id: String,
    role_namespace: String,
}

#[derive(Debug)]
struct MergedRole {
    types: Vec<String>,
    permissions: BTreeSet<String>,
}

/// Compiles a policy set into an authorization schema.
///
/// The result contains one definition per namespace referenced by a policy,
/// plus the built-in `user` definition. Output is independent of input order.
pub fn compile(policies: &[Policy]) -> DomainResult<AuthorizationSchema> {
    compile_with_namespaces::<&str>(&[], policies)
}

/// Like [`compile`], but also emits (possibly empty) definitions for every
/// namespace in `namespaces`, so that subject types naming them resolve.
pub fn compile_with_namespaces<S: AsRef<str>>(
    namespaces: &[S],
    policies: &[Policy],
) -> DomainResult<AuthorizationSchema> {
    let mut grouped: BTreeMap<String, BTreeMap<RoleKey, MergedRole>> = BTreeMap::new();
    grouped.entry(namespaces::USER.to_string()).or_default();
    for namespace in namespaces {
        grouped.entry(normalize(namespace.as_ref())).or_default();
    }

    for policy in policies {
        validate_policy(policy)?;

        let key = RoleKey {
            role_id: normalize(&policy.role.id),
            role_namespace: normalize(policy.role.namespace_or(&policy.namespace_id)),
        };
        let types: Vec<String> = policy.role.types.iter().map(|t| normalize(t)).collect();
        let permission = normalize(&policy.permission.id);

        let roles = grouped.entry(normalize(&policy.namespace_id)).or_default();
        match roles.get_mut(&key) {
            Some(existing) => {
                if existing.types != types {
                    return Err(DomainError::schema_compile(format!(
                        "role '{}' is declared with conflicting subject types in '{}'",
                        policy.role.id, policy.namespace_id
                    )));
                }
                existing.permissions.insert(permission);
            }
            None => {
                roles.insert(
                    key,
                    MergedRole {
                        types,
                        permissions: BTreeSet::from([permission]),
                    },
                );
            }
        }
    }

    let definitions = grouped
        .into_iter()
        .map(|(name, roles)| build_definition(name, roles))
        .collect::<DomainResult<Vec<_>>>()?;

    debug!(definitions = definitions.len(), "compiled authorization schema");
    Ok(AuthorizationSchema { definitions })
}

fn validate_policy(policy: &Policy) -> DomainResult<()> {
    if policy.namespace_id.is_empty() {
        return Err(DomainError::schema_compile("policy namespace cannot be empty"));
    }
    if policy.role.id.is_empty() {
        return Err(DomainError::schema_compile(format!(
            "policy in '{}' has an empty role",
            policy.namespace_id
        )));
    }
    if policy.permission.id.is_empty() {
        return Err(DomainError::schema_compile(format!(
            "policy in '{}' has an empty permission",
            policy.namespace_id
        )));
    }

    let permission_ns = &policy.permission.namespace_id;
    if !permission_ns.is_empty() && normalize(permission_ns) != normalize(&policy.namespace_id) {
        return Err(DomainError::schema_compile(format!(
            "permission '{}' namespace '{}' does not match '{}'",
            policy.permission.id, permission_ns, policy.namespace_id
        )));
    }
    Ok(())
}

fn build_definition(name: String, roles: BTreeMap<RoleKey, MergedRole>) -> DomainResult<Definition> {
    let mut definition = Definition::new(&name);
    let mut permissions: BTreeMap<String, Vec<UsersetRef>> = BTreeMap::new();

    for (key, role) in roles {
        let reference = if key.role_namespace == name {
            if role.types.is_empty() {
                return Err(DomainError::schema_compile(format!(
                    "role '{}' in '{}' has no subject types",
                    key.role_id, name
                )));
            }
            if definition.relation(&key.role_id).is_some() {
                return Err(duplicate_relation(&name, &key.role_id));
            }
            definition.relations.push(RelationDefinition {
                name: key.role_id.clone(),
                types: role.types.iter().map(|t| SubjectType::parse(t)).collect(),
            });
            UsersetRef::ComputedUserset {
                relation: key.role_id,
            }
        } else {
            let link = namespace_link(&key.role_namespace);
            match definition.relation(&key.role_namespace) {
                Some(existing) if *existing != link => {
                    return Err(duplicate_relation(&name, &key.role_namespace));
                }
                Some(_) => {}
                None => definition.relations.push(link),
            }
            UsersetRef::TupleToUserset {
                tupleset: key.role_namespace,
                computed: key.role_id,
            }
        };

        for permission in role.permissions {
            let union = permissions.entry(permission).or_default();
            if !union.contains(&reference) {
                union.push(reference.clone());
            }
        }
    }

    for permission in permissions.keys() {
        if definition.relation(permission).is_some() {
            return Err(DomainError::schema_compile(format!(
                "permission '{permission}' collides with a relation of the same name in '{name}'"
            )));
        }
    }

    definition.permissions = permissions
        .into_iter()
        .map(|(name, union)| PermissionDefinition { name, union })
        .collect();
    Ok(definition)
}

/// The reference relation pointing at another namespace's objects.
fn namespace_link(namespace: &str) -> RelationDefinition {
    RelationDefinition {
        name: namespace.to_string(),
        types: vec![SubjectType {
            namespace: namespace.to_string(),
            relation: None,
        }],
    }
}

fn duplicate_relation(definition: &str, relation: &str) -> DomainError {
    DomainError::schema_compile(format!(
        "relation '{relation}' is declared twice in '{definition}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Permission, Role};

    fn policy(ns: &str, role: Role, permission: &str) -> Policy {
        Policy::new(ns, role, Permission::new(permission, ns))
    }

    fn role(id: &str, types: &[&str]) -> Role {
        Role::new(id, types.iter().map(|t| t.to_string()).collect())
    }

    fn render(policies: &[Policy]) -> String {
        compile(policies).unwrap().to_string()
    }

    #[test]
    fn test_single_role_single_permission() {
        let output = render(&[policy("Test", role("Admin", &["User"]), "read")]);
        assert_eq!(
            output,
            "definition Test {\n\trelation Admin: User\n\tpermission read = Admin\n}\n\ndefinition user {}"
        );
    }

    #[test]
    fn test_policies_for_same_role_merge() {
        let admin = role("admin", &["user"]);
        let schema = compile(&[
            policy("project", admin.clone(), "read"),
            policy("project", admin, "write"),
        ])
        .unwrap();

        let project = schema.definition("project").unwrap();
        assert_eq!(project.relations.len(), 1);
        assert_eq!(
            project.to_string(),
            "definition project {\n\trelation admin: user\n\tpermission read = admin\n\tpermission write = admin\n}"
        );
    }

    #[test]
    fn test_cross_namespace_role_uses_indirection() {
        let admin = role("admin", &["user"]).with_namespace("Project");
        let schema = compile(&[policy("Test", admin, "read")]).unwrap();
        assert_eq!(
            schema.definition("Test").unwrap().to_string(),
            "definition Test {\n\trelation Project: Project\n\tpermission read = Project->admin\n}"
        );
    }

    #[test]
    fn test_multiple_foreign_roles() {
        let admin = role("Admin", &["User"]).with_namespace("Project");
        let member = role("Member", &["User"]).with_namespace("Group");
        let schema = compile(&[
            policy("Test", admin.clone(), "read"),
            policy("Test", admin, "write"),
            policy("Test", member, "read"),
        ])
        .unwrap();
        assert_eq!(
            schema.definition("Test").unwrap().to_string(),
            "definition Test {\n\trelation Project: Project\n\trelation Group: Group\n\tpermission read = Project->Admin + Group->Member\n\tpermission write = Project->Admin\n}"
        );
    }

    #[test]
    fn test_foreign_namespace_link_is_emitted_once() {
        let admin = role("admin", &["user"]).with_namespace("project");
        let viewer = role("viewer", &["user"]).with_namespace("project");
        let schema = compile(&[policy("doc", admin, "edit"), policy("doc", viewer, "read")]).unwrap();
        let doc = schema.definition("doc").unwrap();
        assert_eq!(doc.relations.len(), 1);
        assert_eq!(doc.relations[0].name, "project");
    }

    #[test]
    fn test_role_namespace_equal_to_definition_is_local() {
        let admin = role("Admin", &["User"]).with_namespace("Test");
        let output = render(&[policy("Test", admin, "read")]);
        assert!(output.contains("\trelation Admin: User\n"));
        assert!(output.contains("\tpermission read = Admin\n"));
    }

    #[test]
    fn test_local_and_foreign_roles_with_same_name() {
        let org_admin = role("admin", &["user"]).with_namespace("org");
        let local_admin = role("admin", &["user"]);
        let schema = compile(&[
            policy("project", org_admin, "read"),
            policy("project", local_admin.clone(), "write"),
            policy("project", local_admin, "delete"),
        ])
        .unwrap();
        assert_eq!(
            schema.definition("project").unwrap().to_string(),
            "definition project {\n\trelation org: org\n\trelation admin: user\n\tpermission delete = admin\n\tpermission read = org->admin\n\tpermission write = admin\n}"
        );
    }

    #[test]
    fn test_identifiers_are_normalized() {
        let output = render(&[policy(
            "project-1-1",
            role("project-admin", &["user", "team-x#member-of"]),
            "read-all",
        )]);
        assert!(output.contains("definition project_1_1 {"));
        assert!(output.contains("\trelation project_admin: user | team_x#member_of\n"));
        assert!(output.contains("\tpermission read_all = project_admin\n"));
    }

    #[test]
    fn test_subject_types_keep_declaration_order() {
        let output = render(&[policy("doc", role("viewer", &["user", "group#member"]), "read")]);
        assert!(output.contains("\trelation viewer: user | group#member\n"));

        let output = render(&[policy("doc", role("viewer", &["group#member", "user"]), "read")]);
        assert!(output.contains("\trelation viewer: group#member | user\n"));
    }

    #[test]
    fn test_permission_namespace_mismatch_fails() {
        let p = Policy::new(
            "project",
            role("admin", &["user"]),
            Permission::new("read", "organization"),
        );
        let err = compile(&[p]).unwrap_err();
        assert!(matches!(err, DomainError::SchemaCompile { .. }));
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_permission_without_namespace_is_accepted() {
        let p = Policy::new("project", role("admin", &["user"]), Permission::new("read", ""));
        assert!(compile(&[p]).is_ok());
    }

    #[test]
    fn test_conflicting_role_types_fail() {
        let err = compile(&[
            policy("doc", role("viewer", &["user"]), "read"),
            policy("doc", role("viewer", &["group#member"]), "list"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("conflicting subject types"));
    }

    #[test]
    fn test_permission_relation_collision_fails() {
        let err = compile(&[policy("doc", role("read", &["user"]), "read")]).unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_local_role_colliding_with_namespace_link_fails() {
        let foreign = role("admin", &["user"]).with_namespace("project");
        let local = role("project", &["user"]);
        let err = compile(&[policy("doc", foreign, "edit"), policy("doc", local, "view")])
            .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_local_role_without_types_fails() {
        let err = compile(&[policy("doc", role("owner", &[]), "read")]).unwrap_err();
        assert!(err.to_string().contains("no subject types"));
    }

    #[test]
    fn test_user_definition_always_present() {
        let schema = compile(&[]).unwrap();
        assert_eq!(schema.to_string(), "definition user {}");
    }

    #[test]
    fn test_extra_namespaces_render_empty() {
        let schema = compile_with_namespaces(&["organization"], &[]).unwrap();
        assert_eq!(
            schema.to_string(),
            "definition organization {}\n\ndefinition user {}"
        );
    }
}
