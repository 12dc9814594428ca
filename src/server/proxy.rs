//! Connection-id → [`LazyConn`] registry.
//!
//! # Responsibilities
//! - Create a LazyConn on first sight of an id
//! - Discard broken connections so the id redials fresh
//! - Evict connections idle for longer than the idle timeout

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::TunnelConfig;
use crate::net::{Dialer, TcpDialer};
use crate::observability::metrics;
use crate::server::lazy_conn::LazyConn;

/// Server side of the tunnel: owns every live [`LazyConn`].
#[derive(Debug)]
pub struct Proxy {
    config: TunnelConfig,
    dialer: Arc<dyn Dialer>,
    conns: Mutex<HashMap<String, Arc<LazyConn>>>,
}

impl Proxy {
    /// Create a proxy dialing destinations over plain TCP.
    pub fn new(config: TunnelConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer::default()))
    }

    /// Create a proxy with a custom outbound dialer.
    ///
    /// Zero-valued settings in `config` fall back to their defaults.
    pub fn with_dialer(config: TunnelConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config: config.with_defaults(),
            dialer,
            conns: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Look up the connection for `id`, creating it if absent.
    pub fn lazy_conn(&self, id: &str, addr: &str) -> Arc<LazyConn> {
        let mut conns = self.conns.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = conns.get(id) {
            return Arc::clone(conn);
        }

        tracing::debug!(connection_id = %id, destination = %addr, "New tunnel");
        let conn = Arc::new(LazyConn::new(
            id.to_string(),
            addr.to_string(),
            Arc::clone(&self.dialer),
        ));
        conns.insert(id.to_string(), Arc::clone(&conn));
        metrics::set_active_connections(conns.len());
        conn
    }

    /// Remove `conn` from the registry if it is still the entry for its id.
    ///
    /// Returns false when the id already maps to a newer connection.
    pub fn discard(&self, conn: &Arc<LazyConn>) -> bool {
        let mut conns = self.conns.lock().unwrap_or_else(PoisonError::into_inner);
        let current = conns.get(conn.id()).is_some_and(|c| Arc::ptr_eq(c, conn));
        if current {
            conns.remove(conn.id());
            metrics::set_active_connections(conns.len());
            tracing::debug!(connection_id = %conn.id(), "Tunnel discarded");
        }
        current
    }

    /// Whether state exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of live connection ids.
    pub fn len(&self) -> usize {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and close every connection idle for at least the idle timeout.
    pub async fn evict_idle(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let mut evicted = Vec::new();
        {
            let mut conns = self.conns.lock().unwrap_or_else(PoisonError::into_inner);
            conns.retain(|_, conn| {
                if conn.idle_for() >= timeout {
                    evicted.push(Arc::clone(conn));
                    false
                } else {
                    true
                }
            });
            metrics::set_active_connections(conns.len());
        }

        for conn in &evicted {
            tracing::debug!(
                connection_id = %conn.id(),
                destination = %conn.addr(),
                bytes_read = conn.bytes_read(),
                "Evicting idle tunnel"
            );
            conn.close().await;
        }
        if !evicted.is_empty() {
            metrics::record_evictions(evicted.len());
        }
        evicted.len()
    }

    /// Periodically evict idle connections until shutdown.
    pub async fn run_eviction(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = (self.config.idle_timeout() / 4)
            .max(self.config.idle_interval())
            .max(Duration::from_millis(10));
        let mut ticker = time::interval(period);

        tracing::info!(
            period_ms = period.as_millis() as u64,
            idle_timeout_ms = self.config.idle_timeout_ms,
            "Idle eviction starting"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle().await;
                    if evicted > 0 {
                        tracing::info!(evicted, remaining = self.len(), "Evicted idle tunnels");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Idle eviction received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
