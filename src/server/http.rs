//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router dispatching every path to the tunnel handler
//! - Wire up middleware (request ID, tracing, timeout)
//! - Run idle eviction alongside the server
//! - Serve until the shutdown signal fires

use std::sync::Arc;

use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::net::{Dialer, TcpDialer};
use crate::server::handler::tunnel_handler;
use crate::server::proxy::Proxy;

/// HTTP front end for a [`Proxy`].
pub struct HttpServer {
    router: Router,
    proxy: Arc<Proxy>,
    config: ServerConfig,
}

impl HttpServer {
    /// Create a new HTTP server dialing destinations over TCP.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer::default()))
    }

    /// Create a new HTTP server with a custom outbound dialer.
    pub fn with_dialer(mut config: ServerConfig, dialer: Arc<dyn Dialer>) -> Self {
        config.tunnel = config.tunnel.with_defaults();
        let proxy = Arc::new(Proxy::with_dialer(config.tunnel.clone(), dialer));
        let router = build_router(Arc::clone(&proxy));
        Self { router, proxy, config }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            host = ?self.config.tunnel.host,
            idle_interval_ms = self.config.tunnel.idle_interval_ms,
            idle_timeout_ms = self.config.tunnel.idle_timeout_ms,
            "HTTP server starting"
        );

        let eviction = tokio::spawn(Arc::clone(&self.proxy).run_eviction(shutdown.resubscribe()));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        eviction.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(proxy: Arc<Proxy>) -> Router {
    let request_timeout = proxy.config().request_timeout();
    Router::new()
        .route("/", any(tunnel_handler))
        .route("/{*path}", any(tunnel_handler))
        .with_state(proxy)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
