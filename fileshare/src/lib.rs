//! Minimal HTTP server exposing files or a fixed body to test machines.
//!
//! Nodes under test fetch images, ISOs and generated configuration from the
//! host running the suite. The server stops when the caller's shutdown future
//! resolves; connections already in flight are allowed to finish.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::handler::Handler;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

mod listing;

/// A bound listener plus the routes it will serve.
pub struct FileShare {
    listener: TcpListener,
    app: Router,
}

impl FileShare {
    /// Bind `addr` and serve the tree under `dir`. Directories answer with
    /// their `index.html` when present and with a listing otherwise.
    pub async fn bind_dir(dir: impl Into<PathBuf>, addr: SocketAddr) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            anyhow::bail!("{} is not a directory", dir.display());
        }
        info!(dir = %dir.display(), "sharing directory");
        Self::bind(dir_router(dir), addr).await
    }

    /// Bind `addr` and answer every request with `content`.
    pub async fn bind_content(content: impl Into<Bytes>, addr: SocketAddr) -> Result<Self> {
        Self::bind(content_router(content.into()), addr).await
    }

    async fn bind(app: Router, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        Ok(Self { listener, app })
    }

    /// Address actually bound; differs from the requested one for port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("read bound address")
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "listening");
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("serve http")?;
        info!(addr = %addr, "stopped");
        Ok(())
    }
}

/// Serve `dir` on `addr` until `shutdown` resolves.
pub async fn serve_dir<F>(dir: impl Into<PathBuf>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    FileShare::bind_dir(dir, addr).await?.serve(shutdown).await
}

/// Serve `content` for every path on `addr` until `shutdown` resolves.
pub async fn serve_content<F>(
    content: impl Into<Bytes>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    FileShare::bind_content(content, addr).await?.serve(shutdown).await
}

fn dir_router(dir: PathBuf) -> Router {
    let listing = listing::list_directory.with_state(Arc::new(dir.clone()));
    let files = ServeDir::new(dir)
        .append_index_html_on_directories(true)
        .fallback(listing);
    Router::new().fallback_service(files)
}

fn content_router(content: Bytes) -> Router {
    Router::new().fallback(fixed_content).with_state(content)
}

async fn fixed_content(State(content): State<Bytes>) -> Bytes {
    content
}
