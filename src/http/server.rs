//! HTTP server hosting the guard service.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::{GuardError, Result};
use crate::guard::AbuseGuard;

/// HTTP server for the abuse guard sidecar.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The shared guard instance
    guard: Arc<AbuseGuard>,
}

impl HttpServer {
    /// Create a new server for `guard`.
    pub fn new(addr: SocketAddr, guard: Arc<AbuseGuard>) -> Self {
        Self { addr, guard }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(addr = %self.addr, "Starting abuse guard HTTP server");

        axum::serve(listener, router(self.guard))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GuardError::Io(e)
            })
    }
}
