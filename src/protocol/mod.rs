//! Wire protocol shared by client and server.
//!
//! # Frames
//! ```text
//! POST /  Connection-Id, Destination-Address   body = bytes for the upstream socket
//!     ← 200 (Proxy-Host)                         body = empty
//!
//! GET /   Connection-Id, Destination-Address
//!     ← 200 (Proxy-Host, Upstream-EOF)           body = bytes read from upstream
//!
//! anything else
//!     ← 502, Connection: close                   body = diagnostic
//! ```
//!
//! # Design Decisions
//! - Every request carries both headers so any request can lazily create state
//! - An empty GET body without `Upstream-EOF` means "nothing yet", never EOF

pub mod headers;
pub mod id;

pub use headers::{CONNECTION_ID, DESTINATION_ADDRESS, PROXY_HOST, UPSTREAM_EOF};
pub use id::ConnectionId;
