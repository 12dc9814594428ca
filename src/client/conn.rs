//! Client-side logical connection.
//!
//! # Responsibilities
//! - Expose async `read` / `write` over the tunnel
//! - Hand every call to the read or write loop and await its reply
//! - Track activity shared by both loops for idle detection
//!
//! # Design Decisions
//! - The loops own all protocol state; the API only talks to them over channels
//! - "This response ended" never reaches callers; `Ok(0)` is terminal EOF

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::http::{header, Method, Request, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::Instant;

use crate::client::reads::ReadLoop;
use crate::client::transport::{ProxyDialer, ProxyTransport};
use crate::client::writes::WriteLoop;
use crate::config::ClientConfig;
use crate::error::TunnelError;
use crate::lifecycle::Shutdown;
use crate::net::Dialer;
use crate::protocol::{headers, ConnectionId, CONNECTION_ID, DESTINATION_ADDRESS};

/// Proxy host affinity as published by the write loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Affinity {
    /// The initial POST has not completed yet.
    Pending,
    /// The tunnel is established; requests pin to this host if present.
    Established(Option<String>),
    /// The initial POST failed or the connection was closed first.
    Failed,
}

/// A read submission: read at most `max` bytes.
pub(crate) struct ReadRequest {
    pub max: usize,
    pub reply: oneshot::Sender<ReadReply>,
}

pub(crate) enum ReadReply {
    Data(Bytes),
    /// The current response ended without upstream EOF.
    Empty,
    Eof,
    Failed(TunnelError),
}

pub(crate) struct WriteRequest {
    pub data: Bytes,
    pub reply: oneshot::Sender<Result<usize, TunnelError>>,
}

/// Last time bytes moved in either direction.
#[derive(Debug, Clone)]
pub(crate) struct Activity(Arc<Mutex<Instant>>);

impl Activity {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn mark(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }
}

/// Immutable state shared by both loops of one connection.
#[derive(Debug)]
pub(crate) struct Session {
    pub id: ConnectionId,
    pub destination: String,
    pub config: Arc<ClientConfig>,
    pub proxy: ProxyDialer,
}

impl Session {
    fn request(&self, method: Method, host: &str, body: Bytes) -> Result<Request<Full<Bytes>>, TunnelError> {
        Ok(Request::builder()
            .method(method)
            .uri("/")
            .header(header::HOST, host)
            .header(CONNECTION_ID, self.id.as_str())
            .header(DESTINATION_ADDRESS, &self.destination)
            .body(Full::new(body))?)
    }

    /// Send a write frame. Returns the proxy host advertised by the server.
    pub async fn post(
        &self,
        transport: &mut Option<ProxyTransport>,
        target: &str,
        host: &str,
        body: Bytes,
    ) -> Result<Option<String>, TunnelError> {
        let transport = self.proxy.redial_if_necessary(transport, target).await?;
        let request = self.request(Method::POST, host, body)?;

        let exchange = async {
            let response = transport.exchange(request).await?;
            let proxy_host = headers::proxy_host(response.headers());
            // Drain the empty body so the connection can carry the next frame.
            response.into_body().collect().await?;
            Ok::<_, TunnelError>(proxy_host)
        };
        tokio::time::timeout(self.config.idle_interval(), exchange)
            .await
            .map_err(|_| TunnelError::Timeout("write response"))?
    }

    /// Send a read frame and return the response whose body carries the bytes.
    pub async fn get(
        &self,
        transport: &mut Option<ProxyTransport>,
        target: &str,
        host: &str,
    ) -> Result<Response<Incoming>, TunnelError> {
        let transport = self.proxy.redial_if_necessary(transport, target).await?;
        let request = self.request(Method::GET, host, Bytes::new())?;
        tokio::time::timeout(self.config.idle_interval(), transport.exchange(request))
            .await
            .map_err(|_| TunnelError::Timeout("read response"))?
    }
}

/// A byte stream tunneled over HTTP.
///
/// `read` and `write` may be called concurrently from different tasks; calls
/// of the same kind are served in order.
#[derive(Debug)]
pub struct Conn {
    session: Arc<Session>,
    affinity: watch::Receiver<Affinity>,
    read_tx: mpsc::Sender<ReadRequest>,
    write_tx: mpsc::Sender<WriteRequest>,
    done_reading: Arc<RwLock<bool>>,
    shutdown: Shutdown,
}

impl std::fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadRequest").field("max", &self.max).finish()
    }
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRequest").field("len", &self.data.len()).finish()
    }
}

impl Conn {
    /// Open a tunnel to `destination`, returning once the server has dialed it.
    pub(crate) async fn open(
        destination: &str,
        config: Arc<ClientConfig>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, TunnelError> {
        let session = Arc::new(Session {
            id: ConnectionId::new(),
            destination: destination.to_string(),
            proxy: ProxyDialer::new(dialer, Arc::clone(&config)),
            config,
        });

        let (read_tx, read_rx) = mpsc::channel(1);
        let (write_tx, write_rx) = mpsc::channel(1);
        let (affinity_tx, affinity_rx) = watch::channel(Affinity::Pending);
        let (connected_tx, connected_rx) = oneshot::channel();
        let done_reading = Arc::new(RwLock::new(false));
        let shutdown = Shutdown::new();
        let activity = Activity::new();

        tracing::debug!(
            connection_id = %session.id,
            destination = %session.destination,
            proxy = %session.config.proxy_address,
            "Opening tunnel"
        );

        tokio::spawn(
            WriteLoop {
                session: Arc::clone(&session),
                requests: write_rx,
                affinity: affinity_tx,
                connected: Some(connected_tx),
                activity: activity.clone(),
                shutdown: shutdown.clone(),
                stop: shutdown.subscribe(),
            }
            .run(),
        );
        tokio::spawn(
            ReadLoop {
                session: Arc::clone(&session),
                requests: read_rx,
                affinity: affinity_rx.clone(),
                done: Arc::clone(&done_reading),
                activity,
                shutdown: shutdown.clone(),
                stop: shutdown.subscribe(),
            }
            .run(),
        );

        let conn = Self {
            session,
            affinity: affinity_rx,
            read_tx,
            write_tx,
            done_reading,
            shutdown,
        };
        connected_rx.await.map_err(|_| TunnelError::Closed)??;
        Ok(conn)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.session.id
    }

    pub fn destination(&self) -> &str {
        &self.session.destination
    }

    /// The server instance this tunnel is pinned to, if it advertised one.
    pub fn proxy_host(&self) -> Option<String> {
        match &*self.affinity.borrow() {
            Affinity::Established(host) => host.clone(),
            _ => None,
        }
    }

    /// Write all of `data` as one frame. Returns the number of bytes written.
    pub async fn write(&self, data: &[u8]) -> Result<usize, TunnelError> {
        if data.is_empty() {
            return Ok(0);
        }
        let (reply, rx) = oneshot::channel();
        let request = WriteRequest {
            data: Bytes::copy_from_slice(data),
            reply,
        };
        self.write_tx.send(request).await.map_err(|_| TunnelError::Closed)?;
        rx.await.map_err(|_| TunnelError::Closed)?
    }

    /// Read into `buf`. `Ok(0)` means the tunneled stream has ended.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.submit_read(buf.len()).await {
                ReadReply::Data(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    return Ok(bytes.len());
                }
                ReadReply::Empty => continue,
                ReadReply::Eof => return Ok(0),
                ReadReply::Failed(e) => return Err(e),
            }
        }
    }

    async fn submit_read(&self, max: usize) -> ReadReply {
        let done = self.done_reading.read().await;
        if *done {
            return ReadReply::Eof;
        }
        let (reply, rx) = oneshot::channel();
        if self.read_tx.send(ReadRequest { max, reply }).await.is_err() {
            return ReadReply::Eof;
        }
        drop(done);
        rx.await.unwrap_or(ReadReply::Eof)
    }

    /// Stop both loops. Later reads return EOF and writes fail.
    pub fn close(&self) {
        if !self.shutdown.is_triggered() {
            tracing::debug!(connection_id = %self.session.id, "Closing tunnel");
        }
        self.shutdown.trigger();
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
