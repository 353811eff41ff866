//! warden-storage: Storage abstraction layer
//!
//! This crate provides the storage side of the authorization service:
//! - Metadata repository traits (organizations, projects, groups, users,
//!   resources, roles, relations) and an in-memory implementation
//! - Relation adapters: an in-process graph backend and a SpiceDB client
//! - Blob storage for proxy rule documents
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               warden-storage                 │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs  - Repository & blob traits       │
//! │  memory.rs  - In-memory metadata store       │
//! │  graph.rs   - In-memory relation backend     │
//! │  spicedb.rs - SpiceDB HTTP adapter           │
//! │  blob.rs    - Filesystem blob store          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod blob;
pub mod error;
pub mod graph;
pub mod memory;
pub mod spicedb;
pub mod traits;

// Re-export commonly used types
pub use blob::FsBlobStore;
pub use error::{StorageError, StorageResult};
pub use graph::MemoryRelationStore;
pub use memory::MemoryMetadataStore;
pub use spicedb::{SpiceDbClient, SpiceDbConfig};
pub use traits::{
    BlobStore, GroupRepository, OrganizationRepository, ProjectRepository, RelationRepository,
    Repositories, ResourceFilter, ResourceRepository, RoleRepository, UserRepository,
};
