//! Request-side enforcement stages: authenticate, extract attributes,
//! authorize.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::HeaderName;
use serde::Deserialize;
use tracing::{debug, info, warn};
use warden_domain::{DomainError, ObjectRef, Principal};
use warden_server::{Authorizer, PrincipalResolver};

use super::attributes::{extract_all, AttributeSource, AttributeSpec, AttributeValue};
use super::context::RequestContext;
use super::rule::StageConfig;
use crate::errors::{proxy_denial, ApiError, ErrorConfig};
use crate::observability::record_authz_check;

pub const AUTHN: &str = "authn";
pub const ATTRIBUTES: &str = "attributes";
pub const AUTHZ: &str = "authz";

/// Options of the `attributes` middleware.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributesConfig {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
}

/// Options of the `authz` middleware.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzConfig {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
}

/// `{name, namespace, attribute}`: check `name` on `namespace:<attribute value>`.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRule {
    pub name: String,
    pub namespace: String,
    pub attribute: String,
}

pub struct Enforcer {
    principals: Arc<dyn PrincipalResolver>,
    authorizer: Arc<dyn Authorizer>,
    identity_header: HeaderName,
    errors: ErrorConfig,
}

impl Enforcer {
    pub fn new(
        principals: Arc<dyn PrincipalResolver>,
        authorizer: Arc<dyn Authorizer>,
        identity_header: HeaderName,
        errors: ErrorConfig,
    ) -> Self {
        Self {
            principals,
            authorizer,
            identity_header,
            errors,
        }
    }

    /// Runs the stages the matched rule configures. An `authz` middleware or
    /// `authz` hook implies authentication.
    pub async fn enforce(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let rule = Arc::clone(&ctx.rule);
        let authz = rule
            .middleware(AUTHZ)
            .map(decode::<AuthzConfig>)
            .transpose()?;
        let attributes = rule
            .middleware(ATTRIBUTES)
            .map(decode::<AttributesConfig>)
            .transpose()?;

        if rule.middleware(AUTHN).is_some() || authz.is_some() || rule.hook(AUTHZ).is_some() {
            ctx.principal = Some(self.authenticate(ctx).await?);
        }

        let specs: BTreeMap<String, AttributeSpec> = attributes
            .iter()
            .flat_map(|c| c.attributes.iter())
            .chain(authz.iter().flat_map(|c| c.attributes.iter()))
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect();
        self.collect_attributes(ctx, &specs)?;

        match authz {
            Some(config) => self.authorize(ctx, &config).await,
            None => Ok(()),
        }
    }

    async fn authenticate(&self, ctx: &RequestContext) -> Result<Principal, ApiError> {
        let identity = ctx
            .request
            .headers
            .get(&self.identity_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if identity.is_empty() {
            debug!(target: "warden::proxy", rule = %ctx.rule.name, "missing identity header");
            return Err(ApiError::unauthenticated("missing identity"));
        }
        self.principals
            .resolve_identity(identity)
            .await
            .map_err(|e| {
                debug!(target: "warden::proxy", rule = %ctx.rule.name, error = %e, "identity not resolved");
                ApiError::unauthenticated(self.message(&e, "unknown identity"))
            })
    }

    /// Request attributes, then the built-in `namespace` and `user`, then
    /// path parameters, each overriding the previous.
    fn collect_attributes(
        &self,
        ctx: &mut RequestContext,
        specs: &BTreeMap<String, AttributeSpec>,
    ) -> Result<(), ApiError> {
        let extracted = extract_all(specs, AttributeSource::Request, ctx.request.payload())
            .map_err(|e| {
                warn!(target: "warden::proxy", rule = %ctx.rule.name, error = %e, "attribute extraction failed");
                ApiError::unauthenticated(if self.errors.detailed_errors {
                    e.to_string()
                } else {
                    "invalid request attributes".to_string()
                })
            })?;

        ctx.attributes.extend(extracted);
        ctx.attributes.insert(
            "namespace".to_string(),
            AttributeValue::from(ctx.rule.backend.namespace.as_str()),
        );
        if let Some(principal) = &ctx.principal {
            ctx.attributes
                .insert("user".to_string(), AttributeValue::from(principal.id.as_str()));
        }
        for (name, value) in &ctx.params {
            ctx.attributes
                .insert(name.clone(), AttributeValue::from(value.as_str()));
        }
        Ok(())
    }

    /// Passes when any permission rule passes. A list attribute passes only
    /// when every value does. The first check error ends evaluation.
    async fn authorize(&self, ctx: &RequestContext, config: &AuthzConfig) -> Result<(), ApiError> {
        for permission in &config.permissions {
            let Some(value) = ctx.attributes.get(&permission.attribute) else {
                let err = DomainError::invalid_argument(format!(
                    "attribute '{}' was not extracted",
                    permission.attribute
                ));
                warn!(target: "warden::proxy", rule = %ctx.rule.name, error = %err, "authorization failed");
                return Err(proxy_denial(&err, &self.errors));
            };

            if self.check_all(ctx, permission, value).await? {
                info!(
                    target: "warden::proxy",
                    rule = %ctx.rule.name,
                    permission = %permission.name,
                    namespace = %permission.namespace,
                    "request authorized"
                );
                return Ok(());
            }
        }

        info!(
            target: "warden::proxy",
            rule = %ctx.rule.name,
            user = ctx.principal.as_ref().map(|p| p.id.as_str()),
            "request not authorized"
        );
        Err(ApiError::unauthenticated("not authorized"))
    }

    async fn check_all(
        &self,
        ctx: &RequestContext,
        permission: &PermissionRule,
        value: &AttributeValue,
    ) -> Result<bool, ApiError> {
        for id in value.values() {
            let object = ObjectRef::new(&permission.namespace, id);
            match self
                .authorizer
                .check_authorization(ctx.principal.as_ref(), &object, &permission.name)
                .await
            {
                Ok(true) => record_authz_check(&permission.namespace, "allowed"),
                Ok(false) => {
                    record_authz_check(&permission.namespace, "denied");
                    return Ok(false);
                }
                Err(e) => {
                    record_authz_check(&permission.namespace, "error");
                    warn!(
                        target: "warden::proxy",
                        rule = %ctx.rule.name,
                        %object,
                        error = %e,
                        "permission check failed"
                    );
                    return Err(proxy_denial(&e, &self.errors));
                }
            }
        }
        Ok(true)
    }

    fn message(&self, err: &DomainError, generic: &str) -> String {
        if self.errors.detailed_errors {
            err.to_string()
        } else {
            generic.to_string()
        }
    }
}

fn decode<T>(stage: &StageConfig) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned + Default,
{
    stage.decode().map_err(|e| {
        warn!(target: "warden::proxy", stage = %stage.name, error = %e, "invalid middleware config");
        ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            format!("invalid '{}' middleware config", stage.name),
        )
    })
}
