//! Authorization schema compilation.
//!
//! Policies bind roles to permissions inside a namespace. The compiler folds
//! a policy set into one definition per namespace, and the rendered text is
//! what gets published to the graph backend:
//!
//! ```text
//! definition project {
//! 	relation organization: organization
//! 	relation owner: user
//! 	permission read = owner + organization->owner
//! }
//! ```

mod compiler;
mod render;
mod types;
#[cfg(test)]
mod compiler_proptest;

pub use compiler::{compile, compile_with_namespaces};
pub use types::*;
