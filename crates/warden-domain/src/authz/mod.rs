//! Relation adapter contract and schema evaluation.
//!
//! This module contains:
//! - The [`RelationAdapter`] trait every graph backend implements
//! - Relationship filters used for delete/list
//! - A schema evaluator for in-process backends

mod context;
mod evaluator;
mod traits;
mod types;


pub use evaluator::{Evaluator, EvaluatorConfig, TupleSource};
pub use traits::RelationAdapter;
pub use types::{RelationFilter, SubjectFilter};
