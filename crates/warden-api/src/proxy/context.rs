//! Per-request state carried through enforcement, forwarding and hooks.

use std::sync::Arc;

use axum::http::{request::Parts, HeaderMap, Method, Uri};
use bytes::Bytes;
use warden_domain::Principal;

use super::attributes::{Attributes, Payload};
use super::matcher::RouteMatch;
use super::rule::{PathParams, Rule};

/// The buffered inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(parts: Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        }
    }

    pub fn payload(&self) -> Payload<'_> {
        Payload {
            headers: &self.headers,
            uri: Some(&self.uri),
            body: &self.body,
        }
    }
}

/// Owned by the request task; never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub rule: Arc<Rule>,
    pub params: PathParams,
    pub request: InboundRequest,
    pub principal: Option<Principal>,
    pub attributes: Attributes,
}

impl RequestContext {
    pub fn new(route: RouteMatch, request: InboundRequest) -> Self {
        Self {
            rule: route.rule,
            params: route.params,
            request,
            principal: None,
            attributes: Attributes::new(),
        }
    }
}
