//! HTTP control server.
//!
//! ## Endpoints
//!
//! - `GET /` - Control page listing jobs and downloadable archives
//! - `GET /run/{job}` - Start a job in the background
//! - `GET /download/{archive}` - Stream an archive
//! - `GET /status` - JSON listing of the archive store
//! - `GET /cleanup` - Apply the retention window
//!
//! Every connection is served on its own task, so long downloads and
//! running jobs never hold up other requests.

mod error;
mod page;
mod routes;

use axum::{Router, routing::get};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

pub use routes::StatusResponse;

/// Build the control server's router.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(routes::control_page))
        .route("/run/{job}", get(routes::run_job))
        .route("/download/{archive}", get(routes::download))
        .route("/status", get(routes::status))
        .route("/cleanup", get(routes::cleanup))
        .fallback(routes::not_found)
        .with_state(ctx)
}

/// Control server bound to the configured address.
pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown: CancellationToken,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ctx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the web server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Control server listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let app = router(self.ctx.clone());
        let shutdown = self.shutdown.clone();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Control server stopped");
        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
