//! Authorization model types.
//!
//! This module contains:
//! - Schema building blocks (Namespace, Role, Permission, Policy)
//! - Graph references and tuples (ObjectRef, SubjectRef, RelationTuple)
//! - Metadata entities (Organization, Project, Group, User, Resource)

mod entities;
mod types;

pub use entities::*;
pub use types::*;
