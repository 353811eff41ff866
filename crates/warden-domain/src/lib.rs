//! warden-domain: Core authorization domain logic
//!
//! This crate contains the authorization model and everything that can be
//! expressed without I/O:
//! - Namespace/role/permission/policy definitions and their registry
//! - The schema compiler turning policies into a graph schema
//! - The relation adapter contract implemented by graph backends
//! - A schema evaluator for in-process graph backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               warden-domain                  │
//! ├─────────────────────────────────────────────┤
//! │  model/    - Entities, refs, tuples          │
//! │  registry/ - Definitions & validation        │
//! │  schema/   - Compiler & schema DSL renderer  │
//! │  authz/    - Adapter trait & evaluator       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod authz;
pub mod error;
pub mod model;
pub mod registry;
pub mod schema;

// Re-export commonly used types at the crate root
pub use authz::{RelationAdapter, RelationFilter, SubjectFilter};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use model::{ObjectRef, Policy, Principal, RelationTuple, SubjectRef};
pub use registry::Registry;
pub use schema::{compile, AuthorizationSchema};
