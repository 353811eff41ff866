//! Request metrics.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    extract::MatchedPath,
    http::{Request, Response},
};
use tower::{Layer, Service};

/// Request counters, exported through the `metrics` facade and kept in
/// atomics so tests can read them back.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// `route` is the matched route template, or the listener name for
    /// proxied traffic, to keep label cardinality bounded.
    pub fn record(&self, method: &str, route: &str, status: u16, elapsed_secs: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let status_class = match status {
            400..=499 => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
                "4xx"
            }
            500..=599 => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
                "5xx"
            }
            200..=299 => "2xx",
            _ => "other",
        };

        let labels = [
            ("method", method.to_string()),
            ("route", route.to_string()),
            ("status_class", status_class.to_string()),
        ];
        metrics::counter!("warden_http_requests_total", &labels).increment(1);
        metrics::histogram!("warden_http_request_duration_seconds", &labels).record(elapsed_secs);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn client_error_count(&self) -> u64 {
        self.client_errors.load(Ordering::Relaxed)
    }

    pub fn server_error_count(&self) -> u64 {
        self.server_errors.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct MetricsLayer {
    metrics: Arc<RequestMetrics>,
    fallback_route: &'static str,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<RequestMetrics>, fallback_route: &'static str) -> Self {
        Self {
            metrics,
            fallback_route,
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: Arc::clone(&self.metrics),
            fallback_route: self.fallback_route,
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: Arc<RequestMetrics>,
    fallback_route: &'static str,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = request.method().to_string();
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| self.fallback_route.to_string());
        let metrics = Arc::clone(&self.metrics);
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let response = inner.call(request).await?;
            metrics.record(
                &method,
                &route,
                response.status().as_u16(),
                start.elapsed().as_secs_f64(),
            );
            Ok(response)
        })
    }
}
