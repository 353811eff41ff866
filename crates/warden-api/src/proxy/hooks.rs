//! Response hook pipeline.
//!
//! Hooks run in rule order after a successful upstream response. Each
//! returns a [`HookOutcome`]: `Continue` hands the response to the next hook,
//! `Escape` returns the response as-is and skips the rest, `Abort` replaces
//! the response with a 502.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use warden_domain::model::resource_namespace;
use warden_domain::DomainError;
use warden_server::{CreateResource, ResourceCreator};

use super::attributes::{
    extract_all, AttributeSource, AttributeSpec, AttributeValue, Attributes, ExtractionError,
    Payload,
};
use super::context::RequestContext;
use super::rule::StageConfig;
use super::transport::{ProxiedResponse, TransportError};
use crate::errors::ApiError;
use crate::observability::record_hook_escape;

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("upstream responded with {0}")]
    UpstreamStatus(StatusCode),

    #[error("invalid '{hook}' hook config: {message}")]
    InvalidConfig { hook: String, message: String },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub enum HookOutcome {
    Continue(ProxiedResponse),
    Escape(ProxiedResponse, HookError),
    Abort(HookError),
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn serve(
        &self,
        ctx: &RequestContext,
        config: &StageConfig,
        response: ProxiedResponse,
    ) -> HookOutcome;
}

/// Hooks addressable by name from rule config.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<&'static str, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.insert(hook.name(), hook);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Hook>> {
        self.hooks.get(name)
    }

    /// Runs the rule's hooks over the upstream result and produces the
    /// client response.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        upstream: Result<ProxiedResponse, TransportError>,
    ) -> Response {
        let response = match upstream {
            Ok(response) if response.status.as_u16() >= 400 => {
                let status = response.status;
                return escape(ctx, "upstream", response, HookError::UpstreamStatus(status));
            }
            Ok(response) => response,
            Err(e) => {
                error!(target: "warden::hooks", rule = %ctx.rule.name, error = %e, "upstream request failed");
                record_hook_escape("upstream");
                return ApiError::bad_gateway("upstream unavailable").into_response();
            }
        };

        let mut current = response;
        for stage in &ctx.rule.hooks {
            let Some(hook) = self.get(&stage.name) else {
                warn!(target: "warden::hooks", rule = %ctx.rule.name, hook = %stage.name, "unknown hook skipped");
                continue;
            };
            match hook.serve(ctx, stage, current).await {
                HookOutcome::Continue(response) => current = response,
                HookOutcome::Escape(response, err) => {
                    return escape(ctx, hook.name(), response, err);
                }
                HookOutcome::Abort(err) => {
                    error!(target: "warden::hooks", rule = %ctx.rule.name, hook = hook.name(), error = %err, "hook aborted");
                    record_hook_escape(hook.name());
                    return ApiError::bad_gateway("response hook failed").into_response();
                }
            }
        }
        current.into_response()
    }
}

/// Terminal hook: returns the response untouched and records why.
fn escape(ctx: &RequestContext, hook: &str, response: ProxiedResponse, err: HookError) -> Response {
    match &err {
        HookError::UpstreamStatus(status) => {
            debug!(target: "warden::hooks", rule = %ctx.rule.name, status = status.as_u16(), "skipping hooks");
        }
        _ => {
            warn!(target: "warden::hooks", rule = %ctx.rule.name, hook, error = %err, "hook escaped");
        }
    }
    record_hook_escape(hook);
    response.into_response()
}

/// Options of the `authz` hook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzHookConfig {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
}

/// Registers the resources a successful response created. Every combination
/// of the `organization`, `project`, `resource` and `group` (or `team`)
/// values becomes one resource.
pub struct AuthzHook {
    creator: Arc<dyn ResourceCreator>,
}

impl AuthzHook {
    pub const NAME: &'static str = "authz";

    pub fn new(creator: Arc<dyn ResourceCreator>) -> Self {
        Self { creator }
    }

    fn requests(
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Vec<CreateResource>, DomainError> {
        let required = |name: &str| {
            lookup(attributes, &[name]).ok_or_else(|| {
                DomainError::invalid_argument(format!("attribute '{name}' is required"))
            })
        };
        let optional = |names: &[&str]| match lookup(attributes, names) {
            Some(values) => values.into_iter().map(Some).collect(),
            None => vec![None],
        };

        let projects = required("project")?;
        let names = required("resource")?;
        let organizations = optional(&["organization"]);
        let groups = optional(&["group", "team"]);
        let resource_type = lookup(attributes, &["resource_type"])
            .and_then(|values| values.first().map(|v| v.to_string()));
        let namespace_id =
            resource_namespace(&ctx.rule.backend.namespace, resource_type.as_deref());

        let mut requests = Vec::new();
        for organization in &organizations {
            for project in &projects {
                for name in &names {
                    for group in &groups {
                        requests.push(CreateResource {
                            name: name.to_string(),
                            namespace_id: namespace_id.clone(),
                            project: project.to_string(),
                            organization: organization.map(str::to_string),
                            group: group.map(str::to_string),
                        });
                    }
                }
            }
        }
        Ok(requests)
    }
}

/// Values of the first attribute present among `names`.
fn lookup<'a>(attributes: &'a Attributes, names: &[&str]) -> Option<Vec<&'a str>> {
    names
        .iter()
        .find_map(|name| attributes.get(*name))
        .map(AttributeValue::values)
}

#[async_trait]
impl Hook for AuthzHook {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn serve(
        &self,
        ctx: &RequestContext,
        config: &StageConfig,
        response: ProxiedResponse,
    ) -> HookOutcome {
        let config: AuthzHookConfig = match config.decode() {
            Ok(config) => config,
            Err(e) => {
                return HookOutcome::Abort(HookError::InvalidConfig {
                    hook: Self::NAME.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let mut attributes = ctx.attributes.clone();
        let from_request = extract_all(&config.attributes, AttributeSource::Request, ctx.request.payload());
        let from_response = extract_all(
            &config.attributes,
            AttributeSource::Response,
            Payload {
                headers: &response.headers,
                uri: None,
                body: &response.body,
            },
        );
        match (from_request, from_response) {
            (Ok(request), Ok(response_attrs)) => {
                attributes.extend(request);
                attributes.extend(response_attrs);
            }
            (Err(e), _) | (_, Err(e)) => return HookOutcome::Escape(response, e.into()),
        }

        let Some(principal) = ctx.principal.as_ref() else {
            return HookOutcome::Escape(
                response,
                DomainError::unauthenticated("no principal in request context").into(),
            );
        };
        let requests = match Self::requests(ctx, &attributes) {
            Ok(requests) => requests,
            Err(e) => return HookOutcome::Escape(response, e.into()),
        };

        for request in requests {
            match self.creator.create_resource(principal, request).await {
                Ok(resource) => {
                    info!(
                        target: "warden::hooks",
                        rule = %ctx.rule.name,
                        urn = %resource.urn,
                        "registered resource"
                    );
                }
                Err(e) => return HookOutcome::Escape(response, e.into()),
            }
        }
        HookOutcome::Continue(response)
    }
}
