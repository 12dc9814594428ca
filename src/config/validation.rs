//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and addresses.
//! All problems are reported, not just the first one.

use crate::config::schema::{ClientConfig, ServerConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("idle interval ({interval_ms}ms) must be shorter than idle timeout ({timeout_ms}ms)")]
    IntervalNotBelowTimeout { interval_ms: u64, timeout_ms: u64 },

    #[error("{field} is not a host:port address: {value}")]
    BadAddress { field: &'static str, value: String },
}

/// Validate a server configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let tunnel = &config.tunnel;

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_nonzero(&mut errors, "tunnel.idle_interval_ms", tunnel.idle_interval_ms);
    check_nonzero(&mut errors, "tunnel.idle_timeout_ms", tunnel.idle_timeout_ms);
    check_nonzero(&mut errors, "tunnel.flush_interval_ms", tunnel.flush_interval_ms);
    check_nonzero(&mut errors, "tunnel.buffer_size", tunnel.buffer_size as u64);
    check_nonzero(&mut errors, "tunnel.request_timeout_secs", tunnel.request_timeout_secs);
    check_interval(&mut errors, tunnel.idle_interval_ms, tunnel.idle_timeout_ms);

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    finish(errors)
}

/// Validate a client configuration.
pub fn validate_client_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "proxy_address", &config.proxy_address);
    check_nonzero(&mut errors, "idle_interval_ms", config.idle_interval_ms);
    check_nonzero(&mut errors, "idle_timeout_ms", config.idle_timeout_ms);
    check_nonzero(&mut errors, "buffer_size", config.buffer_size as u64);
    check_nonzero(&mut errors, "dial_attempts", config.dial_attempts as u64);
    check_interval(&mut errors, config.idle_interval_ms, config.idle_timeout_ms);

    finish(errors)
}

/// Split a `host:port` string, rejecting empty hosts and non-numeric ports.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    port.parse().ok().map(|port| (host, port))
}

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn check_interval(errors: &mut Vec<ValidationError>, interval_ms: u64, timeout_ms: u64) {
    if interval_ms > 0 && timeout_ms > 0 && interval_ms >= timeout_ms {
        errors.push(ValidationError::IntervalNotBelowTimeout { interval_ms, timeout_ms });
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if split_host_port(value).is_none() {
        errors.push(ValidationError::BadAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
