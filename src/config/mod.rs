//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig / ClientConfig (validated, immutable)
//!     → shared via Arc with the proxy and each client connection
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - The dial override is a runtime value, not a config field
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_client_config, load_config, ConfigError};
pub use schema::{ClientConfig, ListenerConfig, ObservabilityConfig, ServerConfig, TunnelConfig};
