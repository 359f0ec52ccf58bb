//! The route table: maps request paths to handlers.
//!
//! Routes register in configuration order, the static table first. A
//! prefix matches with mount semantics: `/app` matches `/app` and
//! `/app/...` but not `/apple`, and `/` matches everything. When several
//! prefixes match, the longest wins; among equal-length matches the
//! earliest-registered route wins, which makes static-before-dynamic the
//! effective rule for a prefix present in both tables.
//!
//! Every matched request emits exactly one `req`-level record, before the
//! handler runs and never per body chunk. Unmatched paths get a plain 404.

use crate::config::{GatewayConfig, RouteTarget};
use crate::error::{status_response, GatewayBody};
use crate::logging::{LogRecord, SharedSink};
use crate::proxy::{upstream_client, ProxyHandler, UpstreamClient};
use crate::static_files::StaticHandler;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

enum Handler {
    Static(StaticHandler),
    Proxy(ProxyHandler),
}

struct Route {
    prefix: String,
    label: String,
    handler: Handler,
}

pub struct RouteTable {
    routes: Vec<Route>,
    client: UpstreamClient,
    sink: SharedSink,
}

impl RouteTable {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            routes: Vec::new(),
            client: upstream_client(),
            sink,
        }
    }

    /// Build the table from a validated config: the static table in
    /// document order, then the dynamic table in document order.
    pub fn from_config(config: &GatewayConfig, sink: SharedSink) -> Self {
        let mut table = Self::new(sink);
        for (prefix, target) in config.routes() {
            table.register(prefix, target);
        }
        table
    }

    /// Register one route at the end of the table.
    pub fn register(&mut self, prefix: &str, target: RouteTarget) {
        let (label, handler) = match target {
            RouteTarget::Static { local_root } => (
                format!("static:{prefix}"),
                Handler::Static(StaticHandler::new(prefix, local_root)),
            ),
            RouteTarget::Dynamic { upstream_base } => (
                format!("proxy:{prefix}"),
                Handler::Proxy(ProxyHandler::new(
                    prefix,
                    &upstream_base,
                    self.client.clone(),
                    self.sink.clone(),
                )),
            ),
        };
        self.routes.push(Route {
            prefix: prefix.to_string(),
            label,
            handler,
        });
    }

    /// Route one request: log it, dispatch it, or 404.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<GatewayBody> {
        let path = req.uri().path().to_string();
        let Some(route) = self.resolve(&path) else {
            return status_response(StatusCode::NOT_FOUND);
        };

        self.sink.emit(LogRecord::request(&route.label, &path));

        match &route.handler {
            Handler::Static(handler) => handler.serve(&req).await,
            Handler::Proxy(handler) => handler.forward(&req).await,
        }
    }

    /// Longest matching prefix wins; first registration wins ties.
    fn resolve(&self, path: &str) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !prefix_matches(&route.prefix, path) {
                continue;
            }
            match best {
                Some(current) if route.prefix.len() <= current.prefix.len() => {}
                _ => best = Some(route),
            }
        }
        best
    }
}

/// Mount-style prefix matching.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use std::path::PathBuf;

    fn table_with(routes: &[(&str, RouteTarget)]) -> RouteTable {
        let mut table = RouteTable::new(MemorySink::new());
        for (prefix, target) in routes {
            table.register(prefix, target.clone());
        }
        table
    }

    fn static_target() -> RouteTarget {
        RouteTarget::Static {
            local_root: PathBuf::from("public"),
        }
    }

    fn dynamic_target() -> RouteTarget {
        RouteTarget::Dynamic {
            upstream_base: "http://127.0.0.1:3000".to_string(),
        }
    }

    #[test]
    fn test_prefix_matches_mount_semantics() {
        assert!(prefix_matches("/app", "/app"));
        assert!(prefix_matches("/app", "/app/page"));
        assert!(!prefix_matches("/app", "/apple"));
        assert!(prefix_matches("/", "/anything/at/all"));
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let table = table_with(&[
            ("/", static_target()),
            ("/api", dynamic_target()),
            ("/api/v2", dynamic_target()),
        ]);

        assert_eq!(table.resolve("/api/v2/users").unwrap().label, "proxy:/api/v2");
        assert_eq!(table.resolve("/api/users").unwrap().label, "proxy:/api");
        assert_eq!(table.resolve("/index.html").unwrap().label, "static:/");
    }

    #[tokio::test]
    async fn test_static_wins_equal_length_tie() {
        // Registration order is static table first, so a prefix present in
        // both tables resolves to the static handler.
        let table = table_with(&[("/app", static_target()), ("/app", dynamic_target())]);
        assert_eq!(table.resolve("/app/x").unwrap().label, "static:/app");
    }

    #[tokio::test]
    async fn test_no_match_without_root_route() {
        let table = table_with(&[("/api", dynamic_target())]);
        assert!(table.resolve("/other").is_none());
    }
}
