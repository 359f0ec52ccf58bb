//! The listening side of the gateway: bind, announce, accept.

use crate::logging::{Level, LogRecord, SharedSink};
use crate::router::RouteTable;
use anyhow::Context;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error};

pub struct GatewayServer {
    listener: TcpListener,
    addr: SocketAddr,
    router: Arc<RouteTable>,
    sink: SharedSink,
}

impl GatewayServer {
    /// Bind the listening socket. Failure here is fatal to startup; the
    /// caller logs it at crit and exits.
    pub async fn bind(
        addr: SocketAddr,
        router: Arc<RouteTable>,
        sink: SharedSink,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Unable to bind port {}", addr.port()))?;
        let addr = listener.local_addr().context("listener has no local address")?;
        Ok(Self {
            listener,
            addr,
            router,
            sink,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Announce readiness and run the accept loop until shutdown is
    /// signalled. One task per connection; a slow handler never stalls
    /// the accept loop.
    pub async fn serve(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        started: Instant,
    ) -> anyhow::Result<()> {
        self.sink.emit(LogRecord::plain(
            Level::Info,
            format!(
                "Started and listening on {}. ({} ms)",
                self.addr.port(),
                started.elapsed().as_millis()
            ),
        ));

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let router = Arc::clone(&self.router);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let router = Arc::clone(&router);
                                    async move {
                                        Ok::<_, hyper::Error>(router.handle(req).await)
                                    }
                                });
                                let served = ConnectionBuilder::new(TokioExecutor::new())
                                    .serve_connection(io, service)
                                    .await;
                                if let Err(e) = served {
                                    debug!(peer = %peer, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
