//! Access logging.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{field::Empty, info, info_span, Instrument, Span};

use super::REQUEST_ID_HEADER;

/// Wraps each request in an `http_request` span and logs its completion
/// under the `warden::http` target. `listener` names the admin API or the
/// proxy service handling the request.
#[derive(Clone)]
pub struct AccessLogLayer {
    listener: &'static str,
}

impl AccessLogLayer {
    pub fn new(listener: &'static str) -> Self {
        Self { listener }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            listener: self.listener,
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    listener: &'static str,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AccessLogService<S>
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
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let span = info_span!(
            "http_request",
            listener = self.listener,
            method = %method,
            path = %path,
            request_id = %request_id,
            status = Empty,
        );

        let start = Instant::now();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            async move {
                let response = inner.call(request).await?;
                let status = response.status().as_u16();
                Span::current().record("status", status);
                info!(
                    target: "warden::http",
                    status,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok(response)
            }
            .instrument(span),
        )
    }
}
