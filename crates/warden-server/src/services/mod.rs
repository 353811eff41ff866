//! Services behind the proxy and the admin API.
//!
//! Each collaborator is consumed through a narrow trait so the enforcement
//! pipeline can be exercised against mocks.

mod relation;
mod resolver;
mod resource;
mod traits;
mod user;


pub use relation::{parse_tuple, RelationService};
pub use resolver::PermissionResolver;
pub use resource::{CreateResource, ResourceService};
pub use traits::{Authorizer, PrincipalResolver, ResourceCreator};
pub use user::UserService;
