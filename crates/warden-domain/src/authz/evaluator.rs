//! Permission evaluation against a compiled schema.
//!
//! Resolves a check by walking the schema: relations are answered from
//! stored tuples (following subject sets such as `group:eng#member`),
//! permissions are unions of computed usersets and tuple-to-userset hops.
//! Union branches run concurrently via `FuturesUnordered` and the first
//! granting branch wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::trace;

use crate::error::{DomainError, DomainResult};
use crate::model::{ObjectRef, SubjectRef};
use crate::schema::{AuthorizationSchema, Member, UsersetRef};

use super::context::TraversalContext;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tuple reads needed by the evaluator.
#[async_trait]
pub trait TupleSource: Send + Sync {
    /// Subjects related to `object` through `relation`.
    async fn read_subjects(&self, object: &ObjectRef, relation: &str)
        -> DomainResult<Vec<SubjectRef>>;
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Maximum traversal depth.
    pub max_depth: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self { max_depth: 25 }
    }
}

pub struct Evaluator<T: TupleSource> {
    tuples: Arc<T>,
    config: EvaluatorConfig,
}

impl<T: TupleSource> Evaluator<T> {
    pub fn new(tuples: Arc<T>) -> Self {
        Self::with_config(tuples, EvaluatorConfig::default())
    }

    pub fn with_config(tuples: Arc<T>, config: EvaluatorConfig) -> Self {
        Self { tuples, config }
    }

    /// Returns true when `subject` holds `name` (relation or permission) on `object`.
    ///
    /// A path that only ends in cycles grants nothing; exceeding the depth
    /// limit is an error.
    pub async fn check(
        &self,
        schema: &AuthorizationSchema,
        subject: &SubjectRef,
        object: &ObjectRef,
        name: &str,
    ) -> DomainResult<bool> {
        let definition = schema
            .definition(&object.namespace)
            .ok_or_else(|| DomainError::not_found("definition", &object.namespace))?;
        if definition.member(name).is_none() {
            return Err(DomainError::invalid_argument(format!(
                "'{name}' is not a relation or permission of '{}'",
                object.namespace
            )));
        }

        match self
            .check_member(schema, subject, object.clone(), name.to_string(), TraversalContext::new())
            .await
        {
            Err(DomainError::CycleDetected { path }) => {
                trace!(%path, "check terminated in cycle");
                Ok(false)
            }
            other => other,
        }
    }

    fn check_member<'a>(
        &'a self,
        schema: &'a AuthorizationSchema,
        subject: &'a SubjectRef,
        object: ObjectRef,
        name: String,
        ctx: TraversalContext,
    ) -> BoxFuture<'a, DomainResult<bool>> {
        Box::pin(async move {
            if ctx.depth >= self.config.max_depth {
                return Err(DomainError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }
            let key = format!("{object}#{name}");
            if ctx.has_visited(&key) {
                return Err(DomainError::CycleDetected { path: key });
            }
            let ctx = ctx.descend(&key);

            // Definitions reached by following tuples may not declare the member.
            let Some(definition) = schema.definition(&object.namespace) else {
                return Ok(false);
            };
            match definition.member(&name) {
                None => Ok(false),
                Some(Member::Relation(_)) => {
                    self.check_relation(schema, subject, object, name, ctx).await
                }
                Some(Member::Permission(permission)) => {
                    let branches = permission
                        .union
                        .iter()
                        .map(|userset| {
                            self.check_userset(schema, subject, object.clone(), userset, ctx.clone())
                        })
                        .collect();
                    any(branches).await
                }
            }
        })
    }

    async fn check_relation<'a>(
        &'a self,
        schema: &'a AuthorizationSchema,
        subject: &'a SubjectRef,
        object: ObjectRef,
        relation: String,
        ctx: TraversalContext,
    ) -> DomainResult<bool> {
        let related = self.tuples.read_subjects(&object, &relation).await?;

        let mut branches = Vec::new();
        for candidate in related {
            if same_subject(&candidate, subject) {
                return Ok(true);
            }
            if candidate.is_direct() {
                continue;
            }
            if let Some(subject_relation) = candidate.relation.clone() {
                branches.push(self.check_member(
                    schema,
                    subject,
                    candidate.object(),
                    subject_relation,
                    ctx.clone(),
                ));
            }
        }
        any(branches).await
    }

    fn check_userset<'a>(
        &'a self,
        schema: &'a AuthorizationSchema,
        subject: &'a SubjectRef,
        object: ObjectRef,
        userset: &'a UsersetRef,
        ctx: TraversalContext,
    ) -> BoxFuture<'a, DomainResult<bool>> {
        Box::pin(async move {
            match userset {
                UsersetRef::ComputedUserset { relation } => {
                    self.check_member(schema, subject, object, relation.clone(), ctx)
                        .await
                }
                UsersetRef::TupleToUserset { tupleset, computed } => {
                    let targets = self.tuples.read_subjects(&object, tupleset).await?;
                    let branches = targets
                        .into_iter()
                        .filter(SubjectRef::is_direct)
                        .map(|target| {
                            self.check_member(
                                schema,
                                subject,
                                target.object(),
                                computed.clone(),
                                ctx.clone(),
                            )
                        })
                        .collect();
                    any(branches).await
                }
            }
        })
    }
}

fn same_subject(candidate: &SubjectRef, subject: &SubjectRef) -> bool {
    candidate.namespace == subject.namespace
        && candidate.id == subject.id
        && ((candidate.is_direct() && subject.is_direct()) || candidate.relation == subject.relation)
}

/// Union of branch results with short-circuit on the first grant.
///
/// Cycles and depth limits only end their own branch. They are reported
/// when no branch produced a definite answer.
async fn any(branches: Vec<BoxFuture<'_, DomainResult<bool>>>) -> DomainResult<bool> {
    let mut pending: FuturesUnordered<_> = branches.into_iter().collect();
    let mut fatal_error: Option<DomainError> = None;
    let mut path_termination: Option<DomainError> = None;
    let mut had_false = false;

    while let Some(result) = pending.next().await {
        match result {
            Ok(true) => return Ok(true),
            Ok(false) => had_false = true,
            Err(e @ (DomainError::CycleDetected { .. } | DomainError::DepthLimitExceeded { .. })) => {
                path_termination = Some(e);
            }
            Err(e) => fatal_error = Some(e),
        }
    }

    if let Some(e) = fatal_error {
        return Err(e);
    }
    if had_false {
        return Ok(false);
    }
    match path_termination {
        Some(e) => Err(e),
        None => Ok(false),
    }
}
