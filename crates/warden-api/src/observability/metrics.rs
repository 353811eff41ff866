//! Prometheus metrics.
//!
//! - `warden_http_requests_total` / `warden_http_request_duration_seconds`
//! - `warden_proxy_decisions_total{rule, decision}`
//! - `warden_authz_checks_total{namespace, result}`
//! - `warden_hook_escapes_total{hook}`
//! - `warden_rule_refresh_total{service, result}`

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Handle used to render the Prometheus exposition.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    describe_metrics();
    Ok(MetricsState::new(handle))
}

fn describe_metrics() {
    metrics::describe_counter!("warden_http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "warden_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    metrics::describe_counter!(
        "warden_proxy_decisions_total",
        "Enforcement decisions by rule and outcome"
    );
    metrics::describe_counter!(
        "warden_authz_checks_total",
        "Permission checks by namespace and result"
    );
    metrics::describe_counter!(
        "warden_hook_escapes_total",
        "Responses returned through the escape hook"
    );
    metrics::describe_counter!(
        "warden_rule_refresh_total",
        "Rule snapshot refreshes by service and result"
    );
}

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.render())
}

pub fn record_proxy_decision(rule: &str, decision: &'static str) {
    let labels = [("rule", rule.to_string()), ("decision", decision.to_string())];
    metrics::counter!("warden_proxy_decisions_total", &labels).increment(1);
}

pub fn record_authz_check(namespace: &str, result: &'static str) {
    let labels = [
        ("namespace", namespace.to_string()),
        ("result", result.to_string()),
    ];
    metrics::counter!("warden_authz_checks_total", &labels).increment(1);
}

pub fn record_hook_escape(hook: &str) {
    let labels = [("hook", hook.to_string())];
    metrics::counter!("warden_hook_escapes_total", &labels).increment(1);
}

pub fn record_rule_refresh(service: &str, ok: bool) {
    let labels = [
        ("service", service.to_string()),
        ("result", if ok { "ok" } else { "error" }.to_string()),
    ];
    metrics::counter!("warden_rule_refresh_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_recorder_renders_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let state = MetricsState::new(recorder.handle());

        metrics::with_local_recorder(&recorder, || {
            record_proxy_decision("firehoses", "allowed");
            record_hook_escape("authz");
        });

        let output = state.render();
        assert!(output.contains("warden_proxy_decisions_total"));
        assert!(output.contains("decision=\"allowed\""));
        assert!(output.contains("warden_hook_escapes_total"));
    }

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        record_authz_check("project", "allowed");
        record_rule_refresh("base", false);
    }
}
