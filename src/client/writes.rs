//! Write loop of a client connection.
//!
//! Establishes the tunnel with an empty POST, publishes the proxy host
//! affinity, then sends one POST per submitted buffer in order.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::client::conn::{Activity, Affinity, Session, WriteRequest};
use crate::client::transport::ProxyTransport;
use crate::error::TunnelError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

pub(crate) struct WriteLoop {
    pub session: Arc<Session>,
    pub requests: mpsc::Receiver<WriteRequest>,
    pub affinity: watch::Sender<Affinity>,
    pub connected: Option<oneshot::Sender<Result<(), TunnelError>>>,
    pub activity: Activity,
    pub shutdown: Shutdown,
    pub stop: broadcast::Receiver<()>,
}

impl WriteLoop {
    pub async fn run(mut self) {
        let mut transport = None;
        if let Some((target, host)) = self.establish(&mut transport).await {
            self.serve_requests(&mut transport, &target, &host).await;
        }
        self.finish().await;
    }

    /// Send the initial empty POST. Returns the dial target and host header
    /// for every later request.
    async fn establish(&mut self, transport: &mut Option<ProxyTransport>) -> Option<(String, String)> {
        let proxy = &self.session.proxy;
        let target = proxy.dial_target(None);
        let host = proxy.host_header(None);

        let result = tokio::select! {
            result = self.session.post(transport, &target, &host, Bytes::new()) => result,
            _ = self.stop.recv() => Err(TunnelError::Closed),
        };

        match result {
            Ok(proxy_host) => {
                self.activity.mark();
                tracing::debug!(
                    connection_id = %self.session.id,
                    destination = %self.session.destination,
                    proxy_host = ?proxy_host,
                    "Tunnel established"
                );
                let target = proxy.dial_target(proxy_host.as_deref());
                let host = proxy.host_header(proxy_host.as_deref());
                // Pinned to another instance: the current transport points elsewhere.
                if transport.as_ref().is_some_and(|t| t.target() != target) {
                    *transport = None;
                }
                self.affinity.send_replace(Affinity::Established(proxy_host));
                if let Some(connected) = self.connected.take() {
                    let _ = connected.send(Ok(()));
                }
                Some((target, host))
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.session.id,
                    destination = %self.session.destination,
                    error = %e,
                    "Failed to establish tunnel"
                );
                self.affinity.send_replace(Affinity::Failed);
                if let Some(connected) = self.connected.take() {
                    let _ = connected.send(Err(e));
                }
                None
            }
        }
    }

    async fn serve_requests(&mut self, transport: &mut Option<ProxyTransport>, target: &str, host: &str) {
        let idle_timeout = self.session.config.idle_timeout();
        loop {
            if self.shutdown.is_triggered() {
                return;
            }
            let remaining = idle_timeout.saturating_sub(self.activity.idle_for());
            let request = tokio::select! {
                biased;
                _ = self.stop.recv() => return,
                request = self.requests.recv() => match request {
                    Some(request) => request,
                    None => return,
                },
                _ = tokio::time::sleep(remaining) => {
                    if self.activity.idle_for() >= idle_timeout {
                        tracing::debug!(connection_id = %self.session.id, "Tunnel idle, closing");
                        self.shutdown.trigger();
                        return;
                    }
                    continue;
                }
            };

            let len = request.data.len();
            let result = tokio::select! {
                result = self.session.post(transport, target, host, request.data) => result,
                _ = self.stop.recv() => {
                    let _ = request.reply.send(Err(TunnelError::Closed));
                    return;
                }
            };

            match result {
                Ok(_) => {
                    self.activity.mark();
                    metrics::record_bytes("upstream", len);
                    tracing::trace!(connection_id = %self.session.id, bytes = len, "Wrote frame");
                    let _ = request.reply.send(Ok(len));
                }
                Err(e) => {
                    tracing::warn!(connection_id = %self.session.id, error = %e, "Write request failed");
                    *transport = None;
                    let _ = request.reply.send(Err(e));
                }
            }
        }
    }

    /// Refuse further submissions and fail every queued one.
    async fn finish(mut self) {
        self.requests.close();
        if let Some(connected) = self.connected.take() {
            let _ = connected.send(Err(TunnelError::Closed));
        }
        self.affinity.send_if_modified(|affinity| {
            if *affinity == Affinity::Pending {
                *affinity = Affinity::Failed;
                true
            } else {
                false
            }
        });
        while let Some(request) = self.requests.recv().await {
            let _ = request.reply.send(Err(TunnelError::Closed));
        }
        tracing::trace!(connection_id = %self.session.id, "Write loop finished");
    }
}
