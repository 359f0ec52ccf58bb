//! Plain-text gateway responses on the shared body type.

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// The uniform response body type used across all handlers.
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// Box a fully-buffered body.
pub fn full_body(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// An empty body (HEAD responses).
pub fn empty_body() -> GatewayBody {
    http_body_util::Empty::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Build a plain-text response.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<GatewayBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .expect("valid response from static parts")
}

/// A response whose body is the status's canonical reason text.
pub fn status_response(status: StatusCode) -> Response<GatewayBody> {
    text_response(status, status.canonical_reason().unwrap_or_default().to_string())
}
