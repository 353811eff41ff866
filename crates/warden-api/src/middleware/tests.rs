use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use tower::ServiceExt;

use super::*;

/// Last `.layer()` call is the outermost: the request id exists before the
/// metrics and access log layers see the request.
fn app(metrics: Arc<RequestMetrics>) -> Router {
    Router::new()
        .route("/", get(|| async { "OK" }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/error",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .layer(AccessLogLayer::new("test"))
        .layer(MetricsLayer::new(metrics, "test"))
        .layer(RequestIdLayer::new())
}

#[tokio::test]
async fn test_request_id_is_generated_when_absent() {
    let response = app(Arc::new(RequestMetrics::new()))
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
    assert_eq!(id.to_str().unwrap().len(), 36, "uuid v4");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let response = app(Arc::new(RequestMetrics::new()))
        .oneshot(
            Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-42");
}

#[tokio::test]
async fn test_metrics_count_requests_by_status_class() {
    let metrics = Arc::new(RequestMetrics::new());
    let app = app(Arc::clone(&metrics));

    for uri in ["/", "/missing", "/error", "/"] {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
    }

    assert_eq!(metrics.request_count(), 4);
    assert_eq!(metrics.client_error_count(), 1);
    assert_eq!(metrics.server_error_count(), 1);
}

#[tokio::test]
async fn test_access_log_layer_passes_response_through() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init();

    let response = app(Arc::new(RequestMetrics::new()))
        .oneshot(Request::builder().uri("/error").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
