//! Lazily dialed upstream connection for one tunnel id.
//!
//! # Responsibilities
//! - Dial the destination exactly once, on first use
//! - Serialize socket reads and socket writes independently
//! - Distinguish "no data yet" from permanent upstream EOF
//! - Track activity for idle eviction
//!
//! # Design Decisions
//! - The socket is split; a GET blocked in a read never delays a POST
//! - A failed dial leaves the cell empty; the proxy drops the whole entry

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use crate::error::TunnelError;
use crate::net::{BoxedStream, Dialer};

/// Outcome of a single upstream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamRead {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// The deadline passed without data. Not EOF.
    Idle,
    /// The upstream socket has ended, now or earlier.
    Eof,
}

/// The dialed socket, split so reads and writes lock independently.
pub struct Upstream {
    reader: Mutex<ReadHalf<BoxedStream>>,
    writer: Mutex<WriteHalf<BoxedStream>>,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream").finish_non_exhaustive()
    }
}

/// Server-side state for one connection id.
#[derive(Debug)]
pub struct LazyConn {
    id: String,
    addr: String,
    dialer: Arc<dyn Dialer>,
    upstream: OnceCell<Upstream>,
    hit_eof: AtomicBool,
    bytes_read: AtomicU64,
    last_active: std::sync::Mutex<Instant>,
}

impl LazyConn {
    pub fn new(id: String, addr: String, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            id,
            addr,
            dialer,
            upstream: OnceCell::new(),
            hit_eof: AtomicBool::new(false),
            bytes_read: AtomicU64::new(0),
            last_active: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Return the upstream socket, dialing it on first call.
    pub async fn get(&self) -> Result<&Upstream, TunnelError> {
        self.upstream
            .get_or_try_init(|| async {
                tracing::debug!(connection_id = %self.id, destination = %self.addr, "Dialing upstream");
                let stream = self
                    .dialer
                    .dial(&self.addr)
                    .await
                    .map_err(|source| TunnelError::Dial {
                        addr: self.addr.clone(),
                        source,
                    })?;
                let (reader, writer) = tokio::io::split(stream);
                Ok::<_, TunnelError>(Upstream {
                    reader: Mutex::new(reader),
                    writer: Mutex::new(writer),
                })
            })
            .await
    }

    /// Whether the socket has been dialed.
    pub fn is_dialed(&self) -> bool {
        self.upstream.initialized()
    }

    /// Write all of `data` to the upstream socket.
    pub async fn write(&self, data: &[u8]) -> Result<(), TunnelError> {
        let upstream = self.get().await?;
        let mut writer = upstream.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        drop(writer);
        self.touch();
        Ok(())
    }

    /// Read once from the upstream socket, waiting at most `deadline`.
    pub async fn read(&self, buf: &mut [u8], deadline: Duration) -> Result<UpstreamRead, TunnelError> {
        if self.hit_eof() {
            return Ok(UpstreamRead::Eof);
        }
        let upstream = self.get().await?;
        let mut reader = upstream.reader.lock().await;
        // Another reader may have hit EOF while we waited for the lock.
        if self.hit_eof() {
            return Ok(UpstreamRead::Eof);
        }

        match tokio::time::timeout(deadline, reader.read(buf)).await {
            Err(_) => Ok(UpstreamRead::Idle),
            Ok(Ok(0)) if !buf.is_empty() => {
                self.hit_eof.store(true, Ordering::SeqCst);
                self.touch();
                tracing::debug!(
                    connection_id = %self.id,
                    bytes_read = self.bytes_read(),
                    "Upstream reached EOF"
                );
                Ok(UpstreamRead::Eof)
            }
            Ok(Ok(n)) => {
                self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                self.touch();
                Ok(UpstreamRead::Data(n))
            }
            Ok(Err(e)) => Err(TunnelError::Upstream(e)),
        }
    }

    /// Shut down the write half, signalling EOF to the destination.
    pub async fn close(&self) {
        if let Some(upstream) = self.upstream.get() {
            let mut writer = upstream.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::trace!(connection_id = %self.id, error = %e, "Shutdown failed");
            }
        }
    }

    /// Whether upstream EOF has been observed. Never reset once true.
    pub fn hit_eof(&self) -> bool {
        self.hit_eof.load(Ordering::SeqCst)
    }

    /// Total bytes read from upstream.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Record activity on this connection.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last request or socket activity.
    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}
