//! The proxy listener: match, enforce, forward, run hooks.

use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tracing::{debug, info};

use super::context::{InboundRequest, RequestContext};
use super::enforce::Enforcer;
use super::hooks::HookRegistry;
use super::matcher::RuleMatcher;
use super::transport::Transport;
use crate::errors::ApiError;
use crate::middleware::{AccessLogLayer, MetricsLayer, RequestIdLayer, RequestMetrics};
use crate::observability::record_proxy_decision;

#[derive(Clone)]
pub struct ProxyState {
    pub matcher: Arc<RuleMatcher>,
    pub enforcer: Arc<Enforcer>,
    pub transport: Arc<Transport>,
    pub hooks: Arc<HookRegistry>,
    pub body_limit: usize,
}

/// Requests matching no rule fall through to a 404.
pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(not_proxied)
        .layer(middleware::from_fn_with_state(state, proxy))
        .layer(AccessLogLayer::new("proxy"))
        .layer(MetricsLayer::new(Arc::new(RequestMetrics::new()), "proxy"))
        .layer(RequestIdLayer::new())
}

async fn not_proxied() -> ApiError {
    ApiError::not_found("no route")
}

async fn proxy(State(state): State<ProxyState>, request: Request, next: Next) -> Response {
    let Some(route) = state.matcher.find(request.method(), request.uri().path()) else {
        debug!(target: "warden::proxy", path = %request.uri().path(), "no rule matched");
        return next.run(request).await;
    };
    let rule_name = route.rule.name.clone();

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.body_limit).await {
        Ok(body) => body,
        Err(_) => {
            record_proxy_decision(&rule_name, "rejected");
            return ApiError::payload_too_large(state.body_limit).into_response();
        }
    };

    let mut ctx = RequestContext::new(route, InboundRequest::new(parts, body));
    if let Err(denial) = state.enforcer.enforce(&mut ctx).await {
        record_proxy_decision(&rule_name, "denied");
        info!(
            target: "warden::proxy",
            rule = %rule_name,
            status = denial.status.as_u16(),
            "request denied"
        );
        return denial.into_response();
    }
    record_proxy_decision(&rule_name, "allowed");

    let upstream = state.transport.forward(&ctx).await;
    state.hooks.run(&ctx, upstream).await
}
