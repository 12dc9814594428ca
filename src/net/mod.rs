//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! server: LazyConn::get()          → Dialer::dial(destination) → upstream socket
//! client: ProxyTransport::dial()   → Dialer::dial(proxy host)  → HTTP/1.1 connection
//! ```
//!
//! # Design Decisions
//! - Dialing is a trait object so either side can swap the outbound transport
//! - Dialed streams are boxed; callers only need AsyncRead + AsyncWrite

pub mod dial;

pub use dial::{BoxedStream, Dialer, Stream, TcpDialer};
