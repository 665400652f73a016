//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::{create_router, AppState};
use crate::error::Result;

/// HTTP server for the messaging API.
pub struct HttpServer {
    listener: TcpListener,
    state: AppState,
}

impl HttpServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `signal` resolves, then finish in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = %self.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        let app = create_router(self.state);
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
