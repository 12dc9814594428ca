//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → broadcast to every subscribed task → tasks exit
//! ```
//!
//! # Design Decisions
//! - One coordinator type for the server process and for each client tunnel
//! - Triggering is idempotent and remembered, so late checks still see it

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
