//! Namespace, role, permission and policy definitions.
//!
//! The registry holds the declarative inputs of the schema compiler and
//! validates references between them as they are added. Roles and
//! permissions are addressed as `namespace:id`; a bare `id` inside a policy
//! refers to the policy's own namespace.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::model::{
    namespaces, normalize, relations, Namespace, Permission, Policy, PolicyBinding, Role,
};
use crate::schema::{compile_with_namespaces, AuthorizationSchema};

const SYSTEM_DEFINITIONS: &str = include_str!("system.yaml");

/// A YAML document declaring namespaces with their roles and permissions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefinitionsDocument {
    #[serde(default)]
    pub namespaces: Vec<NamespaceDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Resource namespaces get an `owner` role and inherit every permission
    /// from project owners.
    #[serde(default)]
    pub resource: bool,
    #[serde(default)]
    pub roles: Vec<RoleDocument>,
    #[serde(default)]
    pub permissions: Vec<PermissionDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Roles granting this permission, `id` or `namespace:id`.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl DefinitionsDocument {
    pub fn from_yaml(source: &str) -> DomainResult<Self> {
        serde_yaml::from_str(source).map_err(|e| {
            DomainError::invalid_argument(format!("invalid definitions document: {e}"))
        })
    }
}

/// In-memory registry of schema definitions.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    namespaces: BTreeMap<String, Namespace>,
    roles: BTreeMap<String, Role>,
    permissions: BTreeMap<String, Permission>,
    policies: Vec<PolicyBinding>,
}

fn qualified(namespace: &str, id: &str) -> String {
    format!("{}:{}", normalize(namespace), normalize(id))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `user`, `organization`, `group` and
    /// `project` namespaces.
    pub fn system() -> DomainResult<Self> {
        let mut registry = Self::new();
        registry.add_namespace(Namespace::new(namespaces::USER, "User"))?;
        registry.load(DefinitionsDocument::from_yaml(SYSTEM_DEFINITIONS)?)?;
        Ok(registry)
    }

    /// System registry extended with a definitions document.
    pub fn from_definitions(document: DefinitionsDocument) -> DomainResult<Self> {
        let mut registry = Self::system()?;
        registry.load(document)?;
        Ok(registry)
    }

    pub fn add_namespace(&mut self, namespace: Namespace) -> DomainResult<()> {
        if namespace.id.is_empty() {
            return Err(DomainError::invalid_argument("namespace id cannot be empty"));
        }
        let key = normalize(&namespace.id);
        if self.namespaces.contains_key(&key) {
            return Err(DomainError::conflict("namespace", namespace.id));
        }
        self.namespaces.insert(key, namespace);
        Ok(())
    }

    /// Adds a role. The role's namespace must already be registered, as must
    /// every namespace its subject types name.
    pub fn add_role(&mut self, role: Role) -> DomainResult<()> {
        if role.id.is_empty() {
            return Err(DomainError::invalid_argument("role id cannot be empty"));
        }
        let namespace = role.namespace_id.clone().unwrap_or_default();
        self.require_namespace(&namespace)?;
        for subject_type in &role.types {
            let subject_ns = subject_type.split('#').next().unwrap_or_default();
            self.require_namespace(subject_ns)?;
        }

        let key = qualified(&namespace, &role.id);
        if self.roles.contains_key(&key) {
            return Err(DomainError::conflict("role", key));
        }
        self.roles.insert(key, role);
        Ok(())
    }

    pub fn add_permission(&mut self, permission: Permission) -> DomainResult<()> {
        if permission.id.is_empty() {
            return Err(DomainError::invalid_argument("permission id cannot be empty"));
        }
        self.require_namespace(&permission.namespace_id)?;
        let key = qualified(&permission.namespace_id, &permission.id);
        if self.permissions.contains_key(&key) {
            return Err(DomainError::conflict("permission", key));
        }
        self.permissions.insert(key, permission);
        Ok(())
    }

    /// Binds a role to a permission inside a namespace. Re-adding an existing
    /// binding is a no-op.
    pub fn add_policy(&mut self, binding: PolicyBinding) -> DomainResult<()> {
        self.require_namespace(&binding.namespace_id)?;
        self.resolve_role(&binding.namespace_id, &binding.role_id)?;
        self.resolve_permission(&binding.namespace_id, &binding.permission_id)?;
        if !self.policies.contains(&binding) {
            self.policies.push(binding);
        }
        Ok(())
    }

    /// Loads a definitions document: namespaces first, then roles, then
    /// permissions with their policy bindings.
    pub fn load(&mut self, document: DefinitionsDocument) -> DomainResult<()> {
        for ns in &document.namespaces {
            self.add_namespace(Namespace::new(&ns.id, &ns.name))?;
        }

        for ns in &document.namespaces {
            for role in &ns.roles {
                self.add_role(Role {
                    id: role.id.clone(),
                    name: role.name.clone(),
                    namespace_id: Some(ns.id.clone()),
                    types: role.types.clone(),
                })?;
            }
            if ns.resource && !ns.roles.iter().any(|r| r.id == relations::OWNER) {
                self.add_role(
                    Role::new(relations::OWNER, vec![namespaces::USER.to_string()])
                        .with_namespace(&ns.id),
                )?;
            }
        }

        for ns in &document.namespaces {
            for permission in &ns.permissions {
                self.add_permission(Permission {
                    id: permission.id.clone(),
                    name: permission.name.clone(),
                    namespace_id: ns.id.clone(),
                })?;

                let mut grants = permission.roles.clone();
                if ns.resource {
                    grants.push(relations::OWNER.to_string());
                    grants.push(qualified(namespaces::PROJECT, relations::OWNER));
                }
                for role_id in grants {
                    self.add_policy(PolicyBinding {
                        namespace_id: ns.id.clone(),
                        role_id,
                        permission_id: permission.id.clone(),
                    })?;
                }
            }
        }

        debug!(
            namespaces = self.namespaces.len(),
            roles = self.roles.len(),
            policies = self.policies.len(),
            "loaded definitions"
        );
        Ok(())
    }

    pub fn namespace(&self, id: &str) -> Option<&Namespace> {
        self.namespaces.get(&normalize(id))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Resolves every binding into compiler input.
    pub fn policies(&self) -> DomainResult<Vec<Policy>> {
        self.policies
            .iter()
            .map(|binding| {
                Ok(Policy {
                    namespace_id: binding.namespace_id.clone(),
                    role: self
                        .resolve_role(&binding.namespace_id, &binding.role_id)?
                        .clone(),
                    permission: self
                        .resolve_permission(&binding.namespace_id, &binding.permission_id)?
                        .clone(),
                })
            })
            .collect()
    }

    /// Compiles the registered policies, emitting a definition for every
    /// registered namespace.
    pub fn compile(&self) -> DomainResult<AuthorizationSchema> {
        let ids: Vec<&str> = self.namespaces.values().map(|ns| ns.id.as_str()).collect();
        compile_with_namespaces(ids.as_slice(), &self.policies()?)
    }

    fn require_namespace(&self, id: &str) -> DomainResult<()> {
        if self.namespaces.contains_key(&normalize(id)) {
            Ok(())
        } else {
            Err(DomainError::not_found("namespace", id))
        }
    }

    fn resolve_role(&self, namespace: &str, role_id: &str) -> DomainResult<&Role> {
        let key = match role_id.split_once(':') {
            Some((ns, id)) => qualified(ns, id),
            None => qualified(namespace, role_id),
        };
        self.roles
            .get(&key)
            .ok_or_else(|| DomainError::not_found("role", key))
    }

    fn resolve_permission(&self, namespace: &str, permission_id: &str) -> DomainResult<&Permission> {
        let key = match permission_id.split_once(':') {
            Some((ns, id)) => qualified(ns, id),
            None => qualified(namespace, permission_id),
        };
        self.permissions
            .get(&key)
            .ok_or_else(|| DomainError::not_found("permission", key))
    }
}
