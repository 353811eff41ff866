//! warden-server: Permission resolution and services
//!
//! This crate contains the business logic layer including:
//! - Permission resolver (id-or-slug lookup, authorization checks)
//! - Relation, resource and user services
//! - Bootstrap (schema compilation and publication, seed data)
//! - Configuration management
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               warden-server                  │
//! ├─────────────────────────────────────────────┤
//! │  config.rs    - Configuration management     │
//! │  bootstrap.rs - Schema publication & seeding │
//! │  services/    - Narrow service traits        │
//! │    resolver.rs  - Permission resolver        │
//! │    relation.rs  - Relation writes/deletes    │
//! │    resource.rs  - Hierarchical creation      │
//! │    user.rs      - Identity lookup            │
//! └─────────────────────────────────────────────┘
//! ```

pub mod bootstrap;
pub mod config;
pub mod services;

// Re-exports for convenience
pub use bootstrap::{Bootstrap, SeedDocument};
pub use config::{ConfigLoadError, ServerConfig};
pub use services::{
    Authorizer, CreateResource, PermissionResolver, PrincipalResolver, RelationService,
    ResourceCreator, ResourceService, UserService,
};
