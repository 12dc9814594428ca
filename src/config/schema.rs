//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Durations are stored as integer milliseconds and exposed as [`Duration`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the tunnel server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Session protocol settings.
    pub tunnel: TunnelConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Server-side session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// FQDN guaranteed to reach this particular instance. Required when the
    /// server is reached through e.g. DNS round robin.
    pub host: Option<String>,

    /// Deadline for each upstream socket read in milliseconds.
    pub idle_interval_ms: u64,

    /// Inactivity after which a tunnel is evicted, in milliseconds.
    pub idle_timeout_ms: u64,

    /// Cadence at which streamed GET bodies are flushed, in milliseconds.
    pub flush_interval_ms: u64,

    /// Size of the buffer used to copy upstream bytes into responses.
    pub buffer_size: usize,

    /// Upper bound on a single HTTP request, in seconds.
    pub request_timeout_secs: u64,
}

impl TunnelConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Replace every zero-valued setting with its default.
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.idle_interval_ms == 0 {
            self.idle_interval_ms = defaults.idle_interval_ms;
        }
        if self.idle_timeout_ms == 0 {
            self.idle_timeout_ms = defaults.idle_timeout_ms;
        }
        if self.flush_interval_ms == 0 {
            self.flush_interval_ms = defaults.flush_interval_ms;
        }
        if self.buffer_size == 0 {
            self.buffer_size = defaults.buffer_size;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = defaults.request_timeout_secs;
        }
        self
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            host: None,
            idle_interval_ms: 100,
            idle_timeout_ms: 70_000,
            flush_interval_ms: 50,
            buffer_size: 8096,
            request_timeout_secs: 30,
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Address for the metrics endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "enproxy=info,tower_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Configuration for the tunnel client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the tunnel server (or its front).
    pub proxy_address: String,

    /// Deadline for each HTTP exchange and body read, in milliseconds.
    pub idle_interval_ms: u64,

    /// Inactivity after which a logical connection is torn down, in milliseconds.
    pub idle_timeout_ms: u64,

    /// Chunk size used when pumping local sockets through a tunnel.
    pub buffer_size: usize,

    /// Attempts made when (re)dialing the proxy.
    pub dial_attempts: u32,

    /// Base delay between dial attempts in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum delay between dial attempts in milliseconds.
    pub backoff_max_ms: u64,
}

impl ClientConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_address: "127.0.0.1:8080".to_string(),
            idle_interval_ms: 10_000,
            idle_timeout_ms: 70_000,
            buffer_size: 8096,
            dial_attempts: 3,
            backoff_base_ms: 50,
            backoff_max_ms: 1_000,
        }
    }
}
