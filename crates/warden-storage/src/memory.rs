//! In-memory metadata store.
//!
//! Each entity lives in a `MemoryTable`: rows keyed by primary key in a
//! `DashMap`, plus a second `DashMap` indexing the unique slug (or email,
//! or urn) back to the key. Slug reservation goes through the entry API so
//! concurrent creates cannot both claim the same slug.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::instrument;
use warden_domain::model::{
    Group, Organization, Project, RelationRecord, Resource, Role, User,
};
use warden_domain::{RelationFilter, RelationTuple};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    GroupRepository, OrganizationRepository, ProjectRepository, RelationRepository, Repositories,
    ResourceFilter, ResourceRepository, RoleRepository, UserRepository,
};

/// A row type stored in a [`MemoryTable`].
pub(crate) trait Record: Clone + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn key(&self) -> String;

    /// Generates a primary key when the row has none.
    fn assign_key(&mut self) {}

    /// Unique secondary key, if the entity has one.
    fn slug(&self) -> Option<String> {
        None
    }

    fn touch(&mut self) {}
}

fn new_id(id: &mut String) {
    if id.is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

macro_rules! slugged_record {
    ($ty:ty, $entity:literal, $slug:ident) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;

            fn key(&self) -> String {
                self.id.clone()
            }

            fn assign_key(&mut self) {
                new_id(&mut self.id);
            }

            fn slug(&self) -> Option<String> {
                Some(self.$slug.clone())
            }

            fn touch(&mut self) {
                self.updated_at = Utc::now();
            }
        }
    };
}

slugged_record!(Organization, "organization", slug);
slugged_record!(Project, "project", slug);
slugged_record!(Group, "group", slug);
slugged_record!(User, "user", email);
slugged_record!(Resource, "resource", urn);

impl Record for Role {
    const ENTITY: &'static str = "role";

    fn key(&self) -> String {
        role_key(self.namespace_id.as_deref().unwrap_or_default(), &self.id)
    }
}

impl Record for RelationRecord {
    const ENTITY: &'static str = "relation";

    fn key(&self) -> String {
        self.id.clone()
    }

    fn assign_key(&mut self) {
        new_id(&mut self.id);
    }

    fn slug(&self) -> Option<String> {
        Some(self.tuple().to_string())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

trait AsTuple {
    fn tuple(&self) -> RelationTuple;
}

impl AsTuple for RelationRecord {
    fn tuple(&self) -> RelationTuple {
        RelationTuple::new(self.object.clone(), &self.relation, self.subject.clone())
    }
}

fn role_key(namespace_id: &str, id: &str) -> String {
    format!("{namespace_id}:{id}")
}

/// Rows of one entity with a unique secondary index.
#[derive(Debug)]
pub(crate) struct MemoryTable<T> {
    rows: DashMap<String, T>,
    slugs: DashMap<String, String>,
}

impl<T> Default for MemoryTable<T> {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            slugs: DashMap::new(),
        }
    }
}

impl<T: Record> MemoryTable<T> {
    fn insert(&self, mut row: T) -> StorageResult<T> {
        row.assign_key();
        let key = row.key();
        if key.is_empty() {
            return Err(StorageError::InvalidInput {
                message: format!("{} key cannot be empty", T::ENTITY),
            });
        }

        let slug = row.slug();
        if let Some(slug) = &slug {
            match self.slugs.entry(slug.clone()) {
                Entry::Occupied(_) => return Err(StorageError::already_exists(T::ENTITY, slug)),
                Entry::Vacant(entry) => {
                    entry.insert(key.clone());
                }
            }
        }

        match self.rows.entry(key.clone()) {
            Entry::Occupied(_) => {
                if let Some(slug) = &slug {
                    self.slugs.remove(slug);
                }
                Err(StorageError::already_exists(T::ENTITY, key))
            }
            Entry::Vacant(entry) => {
                entry.insert(row.clone());
                Ok(row)
            }
        }
    }

    fn get(&self, key: &str) -> StorageResult<T> {
        self.rows
            .get(key)
            .map(|row| row.value().clone())
            .ok_or_else(|| StorageError::not_found(T::ENTITY, key))
    }

    fn get_by_slug(&self, slug: &str) -> StorageResult<T> {
        let key = self
            .slugs
            .get(slug)
            .map(|key| key.value().clone())
            .ok_or_else(|| StorageError::not_found(T::ENTITY, slug))?;
        self.get(&key)
    }

    fn list(&self) -> Vec<T> {
        let mut rows: Vec<T> = self.rows.iter().map(|row| row.value().clone()).collect();
        rows.sort_by_key(|row| row.key());
        rows
    }

    fn update(&self, mut row: T) -> StorageResult<T> {
        let key = row.key();
        let mut existing = self
            .rows
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(T::ENTITY, &key))?;

        let old_slug = existing.slug();
        let new_slug = row.slug();
        if old_slug != new_slug {
            if let Some(slug) = &new_slug {
                match self.slugs.entry(slug.clone()) {
                    Entry::Occupied(_) => {
                        return Err(StorageError::already_exists(T::ENTITY, slug));
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(key.clone());
                    }
                }
            }
            if let Some(slug) = &old_slug {
                self.slugs.remove(slug);
            }
        }

        row.touch();
        *existing = row.clone();
        Ok(row)
    }

    fn upsert(&self, row: T) -> StorageResult<T> {
        if self.rows.contains_key(&row.key()) {
            self.update(row)
        } else {
            self.insert(row)
        }
    }

    fn remove(&self, key: &str) -> StorageResult<T> {
        let (_, row) = self
            .rows
            .remove(key)
            .ok_or_else(|| StorageError::not_found(T::ENTITY, key))?;
        if let Some(slug) = row.slug() {
            self.slugs.remove(&slug);
        }
        Ok(row)
    }
}

macro_rules! slugged_repository {
    ($trait:ident, $ty:ty) => {
        #[async_trait]
        impl $trait for MemoryTable<$ty> {
            async fn get_by_id(&self, id: &str) -> StorageResult<$ty> {
                self.get(id)
            }

            async fn get_by_slug(&self, slug: &str) -> StorageResult<$ty> {
                MemoryTable::get_by_slug(self, slug)
            }

            async fn create(&self, row: $ty) -> StorageResult<$ty> {
                self.insert(row)
            }

            async fn list(&self) -> StorageResult<Vec<$ty>> {
                Ok(MemoryTable::list(self))
            }

            async fn update_by_id(&self, row: $ty) -> StorageResult<$ty> {
                let existing = self.get(&row.id)?;
                self.update(<$ty>::keep_created(row, &existing))
            }

            async fn update_by_slug(&self, mut row: $ty) -> StorageResult<$ty> {
                let existing = MemoryTable::get_by_slug(self, &row.slug)?;
                row.id = existing.id.clone();
                self.update(<$ty>::keep_created(row, &existing))
            }
        }
    };
}

trait KeepCreated: Sized {
    fn keep_created(self, existing: &Self) -> Self;
}

macro_rules! keep_created {
    ($($ty:ty),*) => {
        $(impl KeepCreated for $ty {
            fn keep_created(mut self, existing: &Self) -> Self {
                self.created_at = existing.created_at;
                self
            }
        })*
    };
}

keep_created!(Organization, Project, Group, Resource);

slugged_repository!(OrganizationRepository, Organization);
slugged_repository!(ProjectRepository, Project);
slugged_repository!(GroupRepository, Group);

#[async_trait]
impl UserRepository for MemoryTable<User> {
    async fn get_by_id(&self, id: &str) -> StorageResult<User> {
        self.get(id)
    }

    async fn get_by_email(&self, email: &str) -> StorageResult<User> {
        self.get_by_slug(email)
    }

    async fn create(&self, user: User) -> StorageResult<User> {
        if user.email.is_empty() {
            return Err(StorageError::InvalidInput {
                message: "user email cannot be empty".to_string(),
            });
        }
        self.insert(user)
    }

    async fn list(&self) -> StorageResult<Vec<User>> {
        Ok(MemoryTable::list(self))
    }
}

#[async_trait]
impl ResourceRepository for MemoryTable<Resource> {
    async fn get_by_id(&self, id: &str) -> StorageResult<Resource> {
        self.get(id)
    }

    async fn get_by_urn(&self, urn: &str) -> StorageResult<Resource> {
        self.get_by_slug(urn)
    }

    #[instrument(skip(self, resource), fields(urn = %resource.urn))]
    async fn create(&self, resource: Resource) -> StorageResult<Resource> {
        if let Ok(existing) = self.get_by_slug(&resource.urn) {
            return self.update(replace_keeping_identity(resource, &existing));
        }
        match self.insert(resource.clone()) {
            Err(StorageError::AlreadyExists { .. }) => {
                let existing = self.get_by_slug(&resource.urn)?;
                self.update(replace_keeping_identity(resource, &existing))
            }
            other => other,
        }
    }

    async fn list(&self, filter: &ResourceFilter) -> StorageResult<Vec<Resource>> {
        Ok(MemoryTable::list(self)
            .into_iter()
            .filter(|resource| filter.matches(resource))
            .collect())
    }

    async fn update_by_id(&self, resource: Resource) -> StorageResult<Resource> {
        let existing = self.get(&resource.id)?;
        self.update(resource.keep_created(&existing))
    }

    async fn delete_by_id(&self, id: &str) -> StorageResult<()> {
        self.remove(id).map(|_| ())
    }
}

fn replace_keeping_identity(mut resource: Resource, existing: &Resource) -> Resource {
    resource.id = existing.id.clone();
    resource.keep_created(existing)
}

#[async_trait]
impl RoleRepository for MemoryTable<Role> {
    async fn get_by_id(&self, namespace_id: &str, id: &str) -> StorageResult<Role> {
        self.get(&role_key(namespace_id, id))
    }

    async fn create(&self, role: Role) -> StorageResult<Role> {
        self.insert(role)
    }

    async fn upsert(&self, role: Role) -> StorageResult<Role> {
        MemoryTable::upsert(self, role)
    }

    async fn list(&self) -> StorageResult<Vec<Role>> {
        Ok(MemoryTable::list(self))
    }

    async fn update_by_id(&self, role: Role) -> StorageResult<Role> {
        self.update(role)
    }
}

#[async_trait]
impl RelationRepository for MemoryTable<RelationRecord> {
    async fn create(&self, tuple: &RelationTuple) -> StorageResult<RelationRecord> {
        let slug = tuple.to_string();
        if let Ok(existing) = self.get_by_slug(&slug) {
            return Ok(existing);
        }

        let now = Utc::now();
        let record = RelationRecord {
            id: String::new(),
            object: tuple.object.clone(),
            relation: tuple.relation.clone(),
            subject: tuple.subject.clone(),
            created_at: now,
            updated_at: now,
        };
        match self.insert(record) {
            Err(StorageError::AlreadyExists { .. }) => self.get_by_slug(&slug),
            other => other,
        }
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<RelationRecord> {
        self.get(id)
    }

    async fn list(&self, filter: &RelationFilter) -> StorageResult<Vec<RelationRecord>> {
        Ok(MemoryTable::list(self)
            .into_iter()
            .filter(|record| filter.matches(&record.tuple()))
            .collect())
    }

    async fn delete(&self, filter: &RelationFilter) -> StorageResult<usize> {
        let keys: Vec<String> = self
            .rows
            .iter()
            .filter(|row| filter.matches(&row.value().tuple()))
            .map(|row| row.key().clone())
            .collect();
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }
}

/// In-memory implementation of every metadata repository.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    organizations: Arc<MemoryTable<Organization>>,
    projects: Arc<MemoryTable<Project>>,
    groups: Arc<MemoryTable<Group>>,
    users: Arc<MemoryTable<User>>,
    resources: Arc<MemoryTable<Resource>>,
    roles: Arc<MemoryTable<Role>>,
    relations: Arc<MemoryTable<RelationRecord>>,
}

impl MemoryMetadataStore {
    /// Creates a new, empty in-memory metadata store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object handles sharing this store's tables.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            organizations: self.organizations.clone(),
            projects: self.projects.clone(),
            groups: self.groups.clone(),
            users: self.users.clone(),
            resources: self.resources.clone(),
            roles: self.roles.clone(),
            relations: self.relations.clone(),
        }
    }
}
