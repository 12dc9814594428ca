//! Read loop of a client connection.
//!
//! Serves read submissions one at a time by issuing GETs to the tunnel server
//! and draining their bodies. A response ending without `Upstream-EOF` only
//! means "nothing more for now"; the next submission issues a fresh GET.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

use crate::client::conn::{Activity, Affinity, ReadReply, ReadRequest, Session};
use crate::client::transport::ProxyTransport;
use crate::error::TunnelError;
use crate::lifecycle::Shutdown;
use crate::protocol::headers;

/// The GET response currently being drained.
struct ActiveResponse {
    body: Incoming,
    upstream_eof: bool,
    leftover: Bytes,
}

impl ActiveResponse {
    /// Up to `max` bytes of the body, or `None` once it has ended.
    async fn next_chunk(&mut self, max: usize, deadline: Duration) -> Result<Option<Bytes>, TunnelError> {
        loop {
            if !self.leftover.is_empty() {
                let n = max.min(self.leftover.len());
                return Ok(Some(self.leftover.split_to(n)));
            }
            match tokio::time::timeout(deadline, self.body.frame()).await {
                Err(_) => return Err(TunnelError::Timeout("read body")),
                Ok(None) => return Ok(None),
                Ok(Some(frame)) => {
                    // Trailers carry nothing for us.
                    if let Ok(data) = frame?.into_data() {
                        self.leftover = data;
                    }
                }
            }
        }
    }
}

/// Per-loop protocol state.
struct ReadState {
    transport: Option<ProxyTransport>,
    active: Option<ActiveResponse>,
    target: String,
    host: String,
}

impl ReadState {
    async fn serve(
        &mut self,
        session: &Session,
        activity: &Activity,
        shutdown: &Shutdown,
        max: usize,
    ) -> ReadReply {
        match self.try_serve(session, activity, shutdown, max).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(connection_id = %session.id, error = %e, "Read request failed");
                self.active = None;
                self.transport = None;
                ReadReply::Failed(e)
            }
        }
    }

    async fn try_serve(
        &mut self,
        session: &Session,
        activity: &Activity,
        shutdown: &Shutdown,
        max: usize,
    ) -> Result<ReadReply, TunnelError> {
        if self.active.is_none() {
            if activity.idle_for() >= session.config.idle_timeout() {
                tracing::debug!(connection_id = %session.id, "Tunnel idle, closing");
                shutdown.trigger();
                return Ok(ReadReply::Eof);
            }
            let response = session.get(&mut self.transport, &self.target, &self.host).await?;
            let upstream_eof = headers::upstream_eof(response.headers());
            self.active = Some(ActiveResponse {
                body: response.into_body(),
                upstream_eof,
                leftover: Bytes::new(),
            });
        }
        let Some(active) = self.active.as_mut() else {
            return Err(TunnelError::Closed);
        };

        match active.next_chunk(max, session.config.idle_interval()).await? {
            Some(bytes) => {
                activity.mark();
                tracing::trace!(connection_id = %session.id, bytes = bytes.len(), "Read frame");
                Ok(ReadReply::Data(bytes))
            }
            None => {
                let eof = active.upstream_eof;
                self.active = None;
                if eof {
                    tracing::debug!(connection_id = %session.id, "Upstream EOF");
                    Ok(ReadReply::Eof)
                } else {
                    Ok(ReadReply::Empty)
                }
            }
        }
    }
}

pub(crate) struct ReadLoop {
    pub session: Arc<Session>,
    pub requests: mpsc::Receiver<ReadRequest>,
    pub affinity: watch::Receiver<Affinity>,
    pub done: Arc<RwLock<bool>>,
    pub activity: Activity,
    pub shutdown: Shutdown,
    pub stop: broadcast::Receiver<()>,
}

impl ReadLoop {
    pub async fn run(mut self) {
        if let Some(proxy_host) = self.await_affinity().await {
            let mut state = ReadState {
                transport: None,
                active: None,
                target: self.session.proxy.dial_target(proxy_host.as_deref()),
                host: self.session.proxy.host_header(proxy_host.as_deref()),
            };
            self.serve_requests(&mut state).await;
        }
        self.finish().await;
    }

    /// Wait for the write loop to establish the tunnel.
    async fn await_affinity(&mut self) -> Option<Option<String>> {
        loop {
            match &*self.affinity.borrow_and_update() {
                Affinity::Established(host) => return Some(host.clone()),
                Affinity::Failed => return None,
                Affinity::Pending => {}
            }
            if self.shutdown.is_triggered() {
                return None;
            }
            tokio::select! {
                changed = self.affinity.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = self.stop.recv() => return None,
            }
        }
    }

    async fn serve_requests(&mut self, state: &mut ReadState) {
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

            let reply = tokio::select! {
                reply = state.serve(&self.session, &self.activity, &self.shutdown, request.max) => reply,
                _ = self.stop.recv() => {
                    let _ = request.reply.send(ReadReply::Eof);
                    return;
                }
            };
            let terminal = matches!(reply, ReadReply::Eof);
            let _ = request.reply.send(reply);
            if terminal {
                return;
            }
        }
    }

    /// Refuse further submissions and answer every queued one with EOF.
    async fn finish(mut self) {
        self.requests.close();
        *self.done.write().await = true;
        while let Some(request) = self.requests.recv().await {
            let _ = request.reply.send(ReadReply::Eof);
        }
        tracing::trace!(connection_id = %self.session.id, "Read loop finished");
    }
}
