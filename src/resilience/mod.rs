//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Client dial to tunnel server:
//!     → attempt fails
//!     → backoff.rs (exponential delay with jitter)
//!     → next attempt, up to `dial_attempts`
//! ```

pub mod backoff;
