//! Upstream forwarding.

use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header::{self, HeaderName, HeaderValue},
        HeaderMap, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::context::RequestContext;
use super::rule::Backend;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid upstream url '{url}': {message}")]
    InvalidUpstream { url: String, message: String },

    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Forwards requests with `reqwest`. gRPC traffic goes over cleartext
/// HTTP/2 with prior knowledge; everything else uses the default client.
///
/// Response trailers are not relayed.
pub struct Transport {
    http: reqwest::Client,
    h2c: reqwest::Client,
    user_id_header: HeaderName,
}

impl Transport {
    pub fn new(timeout: Duration, user_id_header: HeaderName) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let h2c = reqwest::Client::builder()
            .timeout(timeout)
            .http2_prior_knowledge()
            .build()?;
        Ok(Self {
            http,
            h2c,
            user_id_header,
        })
    }

    pub async fn forward(&self, ctx: &RequestContext) -> Result<ProxiedResponse, TransportError> {
        let request = &ctx.request;
        let url = upstream_url(&ctx.rule.backend, &request.uri)?;
        let mut headers = forwarded_headers(&request.headers);
        headers.remove(&self.user_id_header);
        if let Some(principal) = &ctx.principal {
            if let Ok(value) = HeaderValue::from_str(&principal.id) {
                headers.insert(self.user_id_header.clone(), value);
            }
        }

        let client = if is_grpc(&request.headers) {
            &self.h2c
        } else {
            &self.http
        };
        debug!(target: "warden::proxy", rule = %ctx.rule.name, %url, "forwarding request");

        let response = client
            .request(request.method.clone(), url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response_headers(response.headers());
        let body = response.bytes().await?;
        Ok(ProxiedResponse {
            status,
            headers,
            body,
        })
    }
}

fn is_grpc(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/grpc"))
}

/// Joins the upstream base with the request path minus the backend prefix.
pub fn upstream_url(backend: &Backend, uri: &Uri) -> Result<reqwest::Url, TransportError> {
    let path = uri.path();
    let stripped = if backend.prefix.is_empty() {
        path
    } else {
        path.strip_prefix(backend.prefix.trim_end_matches('/'))
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(path)
    };
    let mut target = backend.upstream.trim_end_matches('/').to_string();
    if !stripped.starts_with('/') {
        target.push('/');
    }
    target.push_str(stripped);
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    reqwest::Url::parse(&target).map_err(|e| TransportError::InvalidUpstream {
        url: target.clone(),
        message: e.to_string(),
    })
}

fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        let keep_te = name == header::TE && value.as_bytes().eq_ignore_ascii_case(b"trailers");
        if is_hop_by_hop(name) && !keep_te {
            continue;
        }
        if name == header::HOST || name == header::CONTENT_LENGTH || name == header::ACCEPT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn response_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(prefix: &str) -> Backend {
        Backend {
            namespace: "entropy".to_string(),
            prefix: prefix.to_string(),
            upstream: "http://entropy:8080/".to_string(),
        }
    }

    #[test]
    fn test_prefix_is_stripped() {
        let uri: Uri = "/entropy/api/firehoses?limit=2".parse().unwrap();
        let url = upstream_url(&backend("/entropy"), &uri).unwrap();
        assert_eq!(url.as_str(), "http://entropy:8080/api/firehoses?limit=2");

        let url = upstream_url(&backend(""), &uri).unwrap();
        assert_eq!(url.as_str(), "http://entropy:8080/entropy/api/firehoses?limit=2");

        let uri: Uri = "/entropy".parse().unwrap();
        let url = upstream_url(&backend("/entropy/"), &uri).unwrap();
        assert_eq!(url.as_str(), "http://entropy:8080/");
    }

    #[test]
    fn test_prefix_is_stripped_on_segment_boundary_only() {
        let uri: Uri = "/entropyx/a".parse().unwrap();
        let url = upstream_url(&backend("/entropy"), &uri).unwrap();
        assert_eq!(url.as_str(), "http://entropy:8080/entropyx/a");

        let uri: Uri = "/entropy/a".parse().unwrap();
        let url = upstream_url(&backend("/entropy"), &uri).unwrap();
        assert_eq!(url.as_str(), "http://entropy:8080/a");
    }

    #[test]
    fn test_invalid_upstream() {
        let mut backend = backend("");
        backend.upstream = "not a url".to_string();
        let uri: Uri = "/x".parse().unwrap();
        assert!(matches!(
            upstream_url(&backend, &uri),
            Err(TransportError::InvalidUpstream { .. })
        ));
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::HOST, HeaderValue::from_static("proxy"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert("x-warden-email", HeaderValue::from_static("alice@acme.io"));

        let forwarded = forwarded_headers(&headers);
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert!(forwarded.get(header::HOST).is_none());
        assert!(forwarded.get(header::ACCEPT_ENCODING).is_none());
        assert_eq!(forwarded.get(header::TE).unwrap(), "trailers");
        assert_eq!(forwarded.get("x-warden-email").unwrap(), "alice@acme.io");
    }
}
