//! API server

use crate::context::AppContext;
use crate::router::build_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// API server bound to one TCP address
pub struct ApiServer {
    addr: SocketAddr,
    ctx: Arc<AppContext>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, ctx: Arc<AppContext>) -> Self {
        Self { addr, ctx }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the shutdown future completes
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let router = build_router(self.ctx);

        info!(bind = %self.addr, "starting API server");

        let listener = TcpListener::bind(self.addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("API server shut down");
        Ok(())
    }
}
