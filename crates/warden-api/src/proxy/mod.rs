//! ReBAC-enforcing reverse proxy.
//!
//! Each proxy listener matches requests against a rule snapshot, runs the
//! rule's enforcement stages, forwards allowed requests upstream and passes
//! the response through the rule's hooks.

mod attributes;
mod context;
mod enforce;
mod grpc;
mod hooks;
mod matcher;
mod rule;
mod server;
mod transport;

pub use attributes::{
    extract, extract_all, AttributeSource, AttributeSpec, AttributeType, AttributeValue,
    Attributes, ExtractionError, Payload,
};
pub use context::{InboundRequest, RequestContext};
pub use enforce::{AttributesConfig, AuthzConfig, Enforcer, PermissionRule};
pub use grpc::GrpcError;
pub use hooks::{AuthzHook, Hook, HookError, HookOutcome, HookRegistry};
pub use matcher::{RouteMatch, RuleMatcher, RuleSnapshot};
pub use rule::{Backend, PathPattern, Rule, RuleConfig, RuleDocument, RuleError, StageConfig};
pub use server::{proxy_router, ProxyState};
pub use transport::{ProxiedResponse, Transport, TransportError};
