//! Startup: publish the authorization schema and load seed data.
//!
//! The registry (system namespaces plus the configured definitions file) is
//! compiled once and written to the relation backend in a single call. A
//! compile failure aborts startup before anything is published.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument};
use warden_domain::model::{namespaces, relations, Group, Organization, Project, User};
use warden_domain::registry::DefinitionsDocument;
use warden_domain::{
    AuthorizationSchema, DomainError, DomainResult, ObjectRef, RelationAdapter, RelationTuple,
    Registry, SubjectRef,
};
use warden_storage::Repositories;

use crate::config::BootstrapSettings;
use crate::services::RelationService;

/// Users and the organization hierarchy to create at startup.
///
/// Members are referenced by email; organizations by slug.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub organizations: Vec<SeedOrganization>,
    #[serde(default)]
    pub projects: Vec<SeedProject>,
    #[serde(default)]
    pub groups: Vec<SeedGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedOrganization {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedProject {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    pub organization: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub viewers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedGroup {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    pub organization: String,
    #[serde(default)]
    pub managers: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl SeedDocument {
    pub fn from_yaml(source: &str) -> DomainResult<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| DomainError::invalid_argument(format!("invalid seed document: {e}")))
    }
}

pub struct Bootstrap {
    repositories: Repositories,
    adapter: Arc<dyn RelationAdapter>,
    relations: RelationService,
}

impl Bootstrap {
    pub fn new(repositories: Repositories, adapter: Arc<dyn RelationAdapter>) -> Self {
        let relations = RelationService::new(repositories.relations.clone(), adapter.clone());
        Self {
            repositories,
            adapter,
            relations,
        }
    }

    /// Loads the registry, persists its roles, compiles and publishes the
    /// schema, then applies the seed file when one is configured.
    pub async fn run(&self, settings: &BootstrapSettings) -> DomainResult<AuthorizationSchema> {
        let registry = match settings.definitions_path.as_deref() {
            Some(path) => {
                let document = DefinitionsDocument::from_yaml(&read_file(path).await?)?;
                Registry::from_definitions(document)?
            }
            None => Registry::system()?,
        };
        let schema = self.publish(&registry).await?;

        if let Some(path) = settings.seed_path.as_deref() {
            self.seed(SeedDocument::from_yaml(&read_file(path).await?)?)
                .await?;
        }
        Ok(schema)
    }

    #[instrument(skip_all)]
    pub async fn publish(&self, registry: &Registry) -> DomainResult<AuthorizationSchema> {
        let schema = registry.compile()?;
        for role in registry.roles() {
            self.repositories.roles.upsert(role.clone()).await?;
        }
        self.adapter.write_schema(&schema).await?;
        info!(definitions = schema.len(), "published authorization schema");
        Ok(schema)
    }

    /// Creates seed rows and their structural relations. Rows that already
    /// exist (by email or slug) are reused.
    #[instrument(skip_all)]
    pub async fn seed(&self, document: SeedDocument) -> DomainResult<()> {
        for seed in &document.users {
            self.ensure_user(seed).await?;
        }

        for seed in &document.organizations {
            let organization = match self.repositories.organizations.get_by_slug(&seed.slug).await
            {
                Ok(existing) => existing,
                Err(e) if e.is_not_found() => {
                    self.repositories
                        .organizations
                        .create(Organization::new(display_name(&seed.name, &seed.slug), &seed.slug))
                        .await?
                }
                Err(e) => return Err(e.into()),
            };
            let object = ObjectRef::new(namespaces::ORGANIZATION, &organization.id);
            self.grant_users(&object, relations::OWNER, &seed.owners).await?;
            self.grant_users(&object, relations::MEMBER, &seed.members).await?;
        }

        for seed in &document.projects {
            let organization = self
                .repositories
                .organizations
                .get_by_slug(&seed.organization)
                .await?;
            let project = match self.repositories.projects.get_by_slug(&seed.slug).await {
                Ok(existing) => existing,
                Err(e) if e.is_not_found() => {
                    self.repositories
                        .projects
                        .create(Project::new(
                            display_name(&seed.name, &seed.slug),
                            &seed.slug,
                            &organization.id,
                        ))
                        .await?
                }
                Err(e) => return Err(e.into()),
            };
            let object = ObjectRef::new(namespaces::PROJECT, &project.id);
            self.relations
                .create(&RelationTuple::new(
                    object.clone(),
                    relations::ORGANIZATION,
                    SubjectRef::new(namespaces::ORGANIZATION, &organization.id),
                ))
                .await?;
            self.grant_users(&object, relations::OWNER, &seed.owners).await?;
            self.grant_users(&object, "viewer", &seed.viewers).await?;
        }

        for seed in &document.groups {
            let organization = self
                .repositories
                .organizations
                .get_by_slug(&seed.organization)
                .await?;
            let group = match self.repositories.groups.get_by_slug(&seed.slug).await {
                Ok(existing) => existing,
                Err(e) if e.is_not_found() => {
                    self.repositories
                        .groups
                        .create(Group::new(
                            display_name(&seed.name, &seed.slug),
                            &seed.slug,
                            &organization.id,
                        ))
                        .await?
                }
                Err(e) => return Err(e.into()),
            };
            let object = ObjectRef::new(namespaces::GROUP, &group.id);
            self.grant_users(&object, "manager", &seed.managers).await?;
            self.grant_users(&object, relations::MEMBER, &seed.members).await?;
        }

        info!(
            users = document.users.len(),
            organizations = document.organizations.len(),
            projects = document.projects.len(),
            groups = document.groups.len(),
            "applied seed data"
        );
        Ok(())
    }

    async fn ensure_user(&self, seed: &SeedUser) -> DomainResult<User> {
        match self.repositories.users.get_by_email(&seed.email).await {
            Ok(existing) => return Ok(existing),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(self
            .repositories
            .users
            .create(User::new(display_name(&seed.name, &seed.email), &seed.email))
            .await?)
    }

    async fn grant_users(
        &self,
        object: &ObjectRef,
        relation: &str,
        emails: &[String],
    ) -> DomainResult<()> {
        for email in emails {
            let user = self.repositories.users.get_by_email(email).await?;
            self.relations
                .create(&RelationTuple::new(
                    object.clone(),
                    relation,
                    SubjectRef::new(namespaces::USER, &user.id),
                ))
                .await?;
        }
        Ok(())
    }
}

fn display_name<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    if name.is_empty() {
        fallback
    } else {
        name
    }
}

async fn read_file(path: &str) -> DomainResult<String> {
    tokio::fs::read_to_string(Path::new(path))
        .await
        .map_err(|e| DomainError::invalid_argument(format!("cannot read '{path}': {e}")))
}
