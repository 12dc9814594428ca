//! Byte-stream tunneling over HTTP.
//!
//! A [`client::Conn`] tunnels a TCP-like stream through plain HTTP/1.1
//! requests: writes become POSTs, reads become GETs. The [`server`] side
//! demultiplexes those requests by connection id onto real outbound sockets.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod server;

pub use client::{Client, Conn};
pub use config::{ClientConfig, ServerConfig};
pub use error::TunnelError;
pub use lifecycle::Shutdown;
pub use server::{HttpServer, Proxy};
