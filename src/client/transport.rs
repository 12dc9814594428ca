//! HTTP transport to the tunnel server.
//!
//! # Responsibilities
//! - Dial the proxy and run an HTTP/1.1 client connection over it
//! - Reuse a live connection, redial a dead one
//! - Retry dialing with exponential backoff
//! - Turn non-200 answers into [`TunnelError::Gateway`]

use std::sync::Arc;

use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;

use crate::config::validation::split_host_port;
use crate::config::ClientConfig;
use crate::error::TunnelError;
use crate::net::Dialer;
use crate::resilience::backoff::calculate_backoff;

/// Upper bound on how much of an error body is kept for diagnostics.
const MAX_ERROR_BODY: usize = 4096;

/// One HTTP/1.1 connection to a tunnel server.
pub struct ProxyTransport {
    sender: SendRequest<Full<Bytes>>,
    target: String,
}

impl ProxyTransport {
    /// Dial `target` and perform the HTTP/1.1 handshake.
    pub async fn dial(target: &str, dialer: &dyn Dialer) -> Result<Self, TunnelError> {
        let stream = dialer.dial(target).await.map_err(|source| TunnelError::Dial {
            addr: target.to_string(),
            source,
        })?;
        let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;

        let target_owned = target.to_string();
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(proxy = %target_owned, error = %err, "Proxy connection ended");
            }
        });

        tracing::trace!(proxy = %target, "Proxy connection established");
        Ok(Self {
            sender,
            target: target.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the connection can still carry requests.
    pub fn is_usable(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Send one request and require a 200 answer.
    pub async fn exchange(&mut self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>, TunnelError> {
        self.sender.ready().await?;
        let response = self.sender.send_request(request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            let body = &body[..body.len().min(MAX_ERROR_BODY)];
            return Err(TunnelError::Gateway {
                status,
                message: String::from_utf8_lossy(body).into_owned(),
            });
        }
        Ok(response)
    }
}

/// Opens [`ProxyTransport`]s, retrying with backoff.
#[derive(Debug, Clone)]
pub struct ProxyDialer {
    dialer: Arc<dyn Dialer>,
    config: Arc<ClientConfig>,
}

impl ProxyDialer {
    pub fn new(dialer: Arc<dyn Dialer>, config: Arc<ClientConfig>) -> Self {
        Self { dialer, config }
    }

    /// Dial `target`, making up to `dial_attempts` attempts.
    pub async fn dial(&self, target: &str) -> Result<ProxyTransport, TunnelError> {
        let attempts = self.config.dial_attempts.max(1);
        let mut attempt = 1;
        loop {
            match ProxyTransport::dial(target, self.dialer.as_ref()).await {
                Ok(transport) => return Ok(transport),
                Err(e) if attempt < attempts => {
                    let delay = calculate_backoff(attempt, self.config.backoff_base_ms, self.config.backoff_max_ms);
                    tracing::debug!(proxy = %target, attempt, delay = ?delay, error = %e, "Retrying proxy dial");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Return `current` if it is live and points at `target`, else redial.
    pub async fn redial_if_necessary<'a>(
        &self,
        current: &'a mut Option<ProxyTransport>,
        target: &str,
    ) -> Result<&'a mut ProxyTransport, TunnelError> {
        let reusable = current
            .as_ref()
            .is_some_and(|t| t.is_usable() && t.target() == target);
        if !reusable {
            *current = None;
            let transport = self.dial(target).await?;
            return Ok(current.insert(transport));
        }
        current.as_mut().ok_or(TunnelError::Closed)
    }

    /// Address to dial for a tunnel pinned to `proxy_host`.
    ///
    /// A host without a port inherits the port of the configured proxy address.
    pub fn dial_target(&self, proxy_host: Option<&str>) -> String {
        match proxy_host {
            None => self.config.proxy_address.clone(),
            Some(host) if split_host_port(host).is_some() => host.to_string(),
            Some(host) => {
                let port = split_host_port(&self.config.proxy_address)
                    .map(|(_, port)| port)
                    .unwrap_or(80);
                format!("{host}:{port}")
            }
        }
    }

    /// Value of the HTTP `Host` header for a tunnel pinned to `proxy_host`.
    pub fn host_header(&self, proxy_host: Option<&str>) -> String {
        proxy_host.unwrap_or(&self.config.proxy_address).to_string()
    }
}
