//! Client half of the tunnel.
//!
//! # Data Flow
//! ```text
//! Conn::write ──mpsc──▶ writes.rs (one POST per buffer) ──┐
//!                                                         ├─▶ transport.rs ─▶ tunnel server
//! Conn::read  ──mpsc──▶ reads.rs (GET, drain body)  ──────┘
//! ```
//!
//! # Design Decisions
//! - Exactly two tasks per connection; each owns its own HTTP transport
//! - The write loop's first POST establishes the tunnel and the host affinity
//! - Both loops stop together on close, drop or idle timeout

pub mod conn;
mod reads;
pub mod transport;
mod writes;

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::TunnelError;
use crate::net::{Dialer, TcpDialer};

pub use conn::Conn;
pub use transport::{ProxyDialer, ProxyTransport};

/// Opens tunneled connections through one tunnel server.
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    dialer: Arc<dyn Dialer>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer::default()))
    }

    /// Use `dialer` to reach the tunnel server.
    pub fn with_dialer(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config: Arc::new(config),
            dialer,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a tunnel to `destination` (`host:port`).
    ///
    /// Returns once the server has dialed the destination.
    pub async fn connect(&self, destination: &str) -> Result<Conn, TunnelError> {
        Conn::open(destination, Arc::clone(&self.config), Arc::clone(&self.dialer)).await
    }
}
