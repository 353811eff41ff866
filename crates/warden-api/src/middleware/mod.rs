//! Tower layers shared by the admin API and the proxy listeners.
//!
//! - Request id propagation
//! - Access logging inside a per-request span
//! - Request metrics

mod logging;
mod metrics;
mod request_id;

pub use logging::AccessLogLayer;
pub use metrics::{MetricsLayer, RequestMetrics};
pub use request_id::{RequestIdLayer, REQUEST_ID_HEADER};

use axum::http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

/// CORS for the admin API: any origin, the verbs the API serves.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

#[cfg(test)]
mod tests;
