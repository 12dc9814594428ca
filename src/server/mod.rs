//! Server half of the tunnel.
//!
//! # Data Flow
//! ```text
//! HTTP request (axum)
//!     → handler.rs (validate headers, dispatch by method)
//!     → proxy.rs (id → LazyConn registry, idle eviction)
//!     → lazy_conn.rs (dial once, serialized socket reads/writes)
//!     → flush_writer.rs (paced delivery of streamed GET bodies)
//! ```
//!
//! # Design Decisions
//! - GET uses one strategy everywhere: a bounded first read decides the
//!   headers, further reads stream into the same body until idle or EOF
//! - Timeouts end a response normally; only the EOF header ends a stream
//! - Broken upstreams are discarded, so the id redials on its next request

pub mod flush_writer;
pub mod handler;
pub mod http;
pub mod lazy_conn;
pub mod proxy;

pub use flush_writer::{FlushSink, FlushWriter, ResponseSink};
pub use http::{build_router, HttpServer};
pub use lazy_conn::{LazyConn, UpstreamRead};
pub use proxy::Proxy;
