//! Upstream request forwarding for dynamic routes.
//!
//! Each dynamic route owns one upstream base URL. Forwarding appends the
//! full original request path (mount prefix included) to the base, copies
//! the inbound headers minus `Host`, and issues a GET through a pooled
//! client. Only GET is forwarded; the upstream side of this gateway has
//! never supported other methods, and rather than rewriting them silently
//! they are refused with 405.

use crate::error::{status_response, text_response, GatewayBody};
use crate::logging::{Level, LogRecord, SharedSink};
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// The pooled client shared by all proxy handlers. Outbound requests carry
/// no body, so the body type is `Empty`.
pub type UpstreamClient = Client<HttpConnector, Empty<Bytes>>;

/// Build the shared upstream client.
pub fn upstream_client() -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    connector.enforce_http(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

pub struct ProxyHandler {
    prefix: String,
    upstream_base: String,
    client: UpstreamClient,
    sink: SharedSink,
}

impl ProxyHandler {
    pub fn new(prefix: &str, upstream_base: &str, client: UpstreamClient, sink: SharedSink) -> Self {
        Self {
            prefix: prefix.to_string(),
            upstream_base: upstream_base.trim_end_matches('/').to_string(),
            client,
            sink,
        }
    }

    /// Forward one request and relay the upstream's answer.
    ///
    /// Upstream success comes back verbatim (status, headers, streamed
    /// body). A non-success upstream status is relayed as status plus its
    /// reason text. An unreachable upstream produces one error-level
    /// `"<prefix> not available"` record and a 502; no retry, no timeout
    /// beyond the client's defaults.
    pub async fn forward(&self, req: &Request<Incoming>) -> Response<GatewayBody> {
        if req.method() != Method::GET {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(hyper::header::ALLOW, HeaderValue::from_static("GET"));
            return response;
        }

        // The full original path is appended, mount prefix included:
        // upstream routes are path-aware.
        let original = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = match format!("{}{}", self.upstream_base, original).parse() {
            Ok(uri) => uri,
            Err(e) => {
                debug!(prefix = %self.prefix, error = %e, "Unroutable upstream URI");
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        let mut upstream_req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Empty::<Bytes>::new())
            .expect("valid request from parsed URI");

        // Relay the inbound headers, dropping Host so the upstream never
        // sees the gateway's host value. The client fills in the
        // upstream's own authority.
        for (name, value) in req.headers() {
            if name == hyper::header::HOST {
                continue;
            }
            upstream_req.headers_mut().append(name.clone(), value.clone());
        }

        match self.client.request(upstream_req).await {
            Ok(response) if response.status().is_success() => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, body.boxed())
            }
            Ok(response) => {
                let status = response.status();
                text_response(
                    status,
                    status.canonical_reason().unwrap_or_default().to_string(),
                )
            }
            Err(e) => {
                debug!(prefix = %self.prefix, error = %e, "Upstream request failed");
                self.sink.emit(LogRecord::plain(
                    Level::Error,
                    format!("{} not available", self.prefix),
                ));
                text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    }
}
