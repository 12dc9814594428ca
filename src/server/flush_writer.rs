//! Flush-paced writer for streamed responses.
//!
//! # Responsibilities
//! - Forward writes to a buffering sink
//! - Flush the sink on a fixed cadence whenever something was written
//! - Serialize writes and flushes so a flush never observes a partial write
//!
//! The timer path never surfaces errors; a failing sink is reported on the
//! next `write` or on `stop`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::observability::metrics;

/// A destination that buffers writes until explicitly flushed.
#[async_trait]
pub trait FlushSink: Send + 'static {
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
}

struct Inner<S> {
    sink: S,
    dirty: bool,
}

/// Wraps a [`FlushSink`] and flushes it every `interval` while dirty.
pub struct FlushWriter<S: FlushSink> {
    inner: Arc<Mutex<Inner<S>>>,
    ticker: JoinHandle<()>,
}

impl<S: FlushSink> FlushWriter<S> {
    /// Start pacing flushes on `sink`. Must be called inside a tokio runtime.
    pub fn new(sink: S, interval: Duration) -> Self {
        let inner = Arc::new(Mutex::new(Inner { sink, dirty: false }));
        let ticker = tokio::spawn(flush_periodically(Arc::clone(&inner), interval));
        Self { inner, ticker }
    }

    /// Write all of `data` to the sink.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sink.write(data).await?;
        inner.dirty = true;
        Ok(())
    }

    /// Cancel the ticker and flush whatever remains.
    pub async fn stop(self) -> io::Result<()> {
        // Holding the lock guarantees the ticker is not mid-flush.
        let mut inner = self.inner.lock().await;
        self.ticker.abort();
        inner.dirty = false;
        inner.sink.flush().await
    }
}

impl<S: FlushSink> Drop for FlushWriter<S> {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

async fn flush_periodically<S: FlushSink>(inner: Arc<Mutex<Inner<S>>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let mut inner = inner.lock().await;
        if !inner.dirty {
            continue;
        }
        inner.dirty = false;
        if let Err(e) = inner.sink.flush().await {
            tracing::debug!(error = %e, "Periodic flush failed");
        }
    }
}

/// Sink feeding an HTTP response body.
///
/// Bytes accumulate in a buffer of `capacity`; each flush emits the buffer as
/// one body frame. A full buffer is flushed immediately.
pub struct ResponseSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: BytesMut,
    capacity: usize,
}

impl ResponseSink {
    /// Create a sink and the body stream it feeds.
    pub fn channel(capacity: usize) -> (Self, impl Stream<Item = io::Result<Bytes>> + Send + 'static) {
        let (tx, rx) = mpsc::channel(4);
        let sink = Self {
            tx,
            buf: BytesMut::with_capacity(capacity),
            capacity,
        };
        let body = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        (sink, body)
    }

    /// Handle that can end the body with an error after the sink is gone.
    pub fn abort_handle(&self) -> BodyAbort {
        BodyAbort(self.tx.clone())
    }
}

/// Terminates a streamed body with an error instead of a clean end.
pub struct BodyAbort(mpsc::Sender<io::Result<Bytes>>);

impl BodyAbort {
    pub async fn abort(self, err: io::Error) {
        let _ = self.0.send(Err(err)).await;
    }
}

#[async_trait]
impl FlushSink for ResponseSink {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.tx.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"));
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let frame = self.buf.split().freeze();
        metrics::record_bytes("downstream", frame.len());
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }
}
