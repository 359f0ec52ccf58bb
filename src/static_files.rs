//! Static file serving for a mounted directory tree.
//!
//! The local root is resolved at registration time; per request we strip
//! the mount prefix, decode the remainder, and serve the file under the
//! root. Directories resolve to `index.html`. Serving is stateless, so
//! repeated requests for the same file return byte-identical responses.

use crate::error::{empty_body, full_body, status_response, text_response, GatewayBody};
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::{Method, Request, Response, StatusCode};
use std::path::PathBuf;

pub struct StaticHandler {
    prefix: String,
    root: PathBuf,
}

impl StaticHandler {
    pub fn new(prefix: &str, root: PathBuf) -> Self {
        Self {
            prefix: prefix.to_string(),
            root,
        }
    }

    pub async fn serve(&self, req: &Request<Incoming>) -> Response<GatewayBody> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(hyper::header::ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let remainder = strip_mount_prefix(&self.prefix, req.uri().path());
        let Some(relative) = sanitize_path(remainder) else {
            return status_response(StatusCode::FORBIDDEN);
        };

        let mut path = self.root.join(relative);
        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.is_dir() {
                path.push("index.html");
            }
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                let builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, mime.essence_str())
                    .header(hyper::header::CONTENT_LENGTH, bytes.len());
                let body = if req.method() == Method::HEAD {
                    empty_body()
                } else {
                    full_body(bytes)
                };
                builder.body(body).expect("valid response from static parts")
            }
            Err(_) => status_response(StatusCode::NOT_FOUND),
        }
    }
}

/// Strip the mount prefix from a request path. The router guarantees the
/// path matched the prefix.
fn strip_mount_prefix<'a>(prefix: &str, path: &'a str) -> &'a str {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    rest.trim_start_matches('/')
}

/// Percent-decode the remainder and rebuild it as a relative path,
/// refusing any `..` component. Malformed escapes pass through
/// literally; only non-UTF-8 decodes are rejected.
fn sanitize_path(remainder: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(remainder).ok()?;
    let mut path = PathBuf::new();
    for component in decoded.split('/') {
        match component {
            "" | "." => continue,
            ".." => return None,
            part => path.push(part),
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mount_prefix() {
        assert_eq!(strip_mount_prefix("/docs", "/docs/guide.html"), "guide.html");
        assert_eq!(strip_mount_prefix("/docs", "/docs"), "");
        assert_eq!(strip_mount_prefix("/", "/index.html"), "index.html");
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_path("../etc/passwd").is_none());
        assert!(sanitize_path("a/../../b").is_none());
        assert!(sanitize_path("%2e%2e/secret").is_none());
    }

    #[test]
    fn test_sanitize_normalizes() {
        assert_eq!(sanitize_path("a//b/./c").unwrap(), PathBuf::from("a/b/c"));
        assert_eq!(sanitize_path("").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_sanitize_decodes_escapes() {
        assert_eq!(
            sanitize_path("hello%20world.txt").unwrap(),
            PathBuf::from("hello world.txt")
        );
        // A literal percent in a file name is not an escape sequence.
        assert_eq!(sanitize_path("50%.txt").unwrap(), PathBuf::from("50%.txt"));
        assert_eq!(sanitize_path("bad%zz").unwrap(), PathBuf::from("bad%zz"));
    }
}
