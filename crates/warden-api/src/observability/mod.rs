//! Observability infrastructure.
//!
//! This module provides:
//! - Prometheus metrics endpoint and recording helpers
//! - Structured logging configuration

mod logging;
mod metrics;

pub use logging::{create_json_layer, init_logging, parse_log_level, LoggingConfig};
pub use metrics::{
    init_metrics, metrics_handler, record_authz_check, record_hook_escape, record_proxy_decision,
    record_rule_refresh, MetricsError, MetricsState,
};
