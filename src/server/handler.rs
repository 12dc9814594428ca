//! HTTP request handling for the tunnel server.
//!
//! # Request Flow
//! ```text
//! request
//!     → method check (GET/POST only)
//!     → Connection-Id / Destination-Address headers
//!     → Proxy::lazy_conn (create on first sight)
//!     → LazyConn::get (dial on first use)
//!     → POST: copy body → upstream socket
//!       GET:  bounded read → headers → stream further reads via FlushWriter
//! ```
//!
//! Every GET response terminates: the first read and each subsequent one is
//! bounded by the idle interval, and the body ends on the first idle read.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;

use crate::error::TunnelError;
use crate::observability::metrics;
use crate::protocol::headers::{self, CONNECTION_ID, DESTINATION_ADDRESS, PROXY_HOST, UPSTREAM_EOF};
use crate::server::flush_writer::{FlushWriter, ResponseSink};
use crate::server::lazy_conn::{LazyConn, UpstreamRead};
use crate::server::proxy::Proxy;

/// Entry point for every tunnel request.
pub async fn tunnel_handler(State(proxy): State<Arc<Proxy>>, request: Request) -> Response {
    let method = request.method().clone();
    let response = match dispatch(&proxy, request).await {
        Ok(response) => response,
        Err(e) => bad_gateway(&e),
    };
    metrics::record_request(method.as_str(), response.status().as_u16());
    response
}

async fn dispatch(proxy: &Arc<Proxy>, request: Request) -> Result<Response, TunnelError> {
    let method = request.method().clone();
    if method != Method::GET && method != Method::POST {
        return Err(TunnelError::UnsupportedMethod(method.to_string()));
    }

    let id = headers::required(request.headers(), &CONNECTION_ID)?;
    let addr = headers::required(request.headers(), &DESTINATION_ADDRESS)?;

    let conn = proxy.lazy_conn(&id, &addr);
    conn.touch();
    if let Err(e) = conn.get().await {
        proxy.discard(&conn);
        return Err(e);
    }

    if method == Method::POST {
        handle_write(proxy, conn, request.into_body()).await
    } else {
        handle_read(proxy, conn).await
    }
}

/// Forward the request body to the upstream socket, in order.
async fn handle_write(proxy: &Arc<Proxy>, conn: Arc<LazyConn>, mut body: Body) -> Result<Response, TunnelError> {
    let mut written = 0usize;
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                // Part of the body may already be upstream; the stream is broken.
                fail(proxy, &conn).await;
                return Err(TunnelError::Upstream(io::Error::new(io::ErrorKind::UnexpectedEof, e)));
            }
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if data.is_empty() {
            continue;
        }
        if let Err(e) = conn.write(&data).await {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Upstream write failed");
            fail(proxy, &conn).await;
            return Err(e);
        }
        written += data.len();
    }

    tracing::trace!(connection_id = %conn.id(), bytes = written, "Forwarded write frame");
    metrics::record_bytes("upstream", written);
    Ok(tunnel_response(proxy, false, Body::empty()))
}

/// Answer a read frame using a bounded first read.
async fn handle_read(proxy: &Arc<Proxy>, conn: Arc<LazyConn>) -> Result<Response, TunnelError> {
    if conn.hit_eof() {
        return Ok(tunnel_response(proxy, true, Body::empty()));
    }

    let config = proxy.config();
    let mut buf = vec![0u8; config.buffer_size];
    match conn.read(&mut buf, config.idle_interval()).await {
        Ok(UpstreamRead::Idle) => Ok(tunnel_response(proxy, false, Body::empty())),
        Ok(UpstreamRead::Eof) => Ok(tunnel_response(proxy, true, Body::empty())),
        Ok(UpstreamRead::Data(n)) => {
            let body = stream_upstream(Arc::clone(proxy), conn, buf, n);
            Ok(tunnel_response(proxy, false, body))
        }
        Err(e) => {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Upstream read failed");
            fail(proxy, &conn).await;
            Err(e)
        }
    }
}

/// Stream `buf[..first]` and every following read into one response body.
///
/// Stops at the first idle read or EOF; a mid-stream EOF is reported by the
/// next GET, which short-circuits on the permanent flag.
fn stream_upstream(proxy: Arc<Proxy>, conn: Arc<LazyConn>, mut buf: Vec<u8>, first: usize) -> Body {
    let config = proxy.config().clone();
    let (sink, body) = ResponseSink::channel(config.buffer_size);
    let abort = sink.abort_handle();

    tokio::spawn(async move {
        let writer = FlushWriter::new(sink, config.flush_interval());
        let mut pending = first;
        let mut failure = None;

        loop {
            if let Err(e) = writer.write(&buf[..pending]).await {
                // The client went away holding bytes we already consumed.
                tracing::debug!(connection_id = %conn.id(), error = %e, "Response body closed mid-stream");
                fail(&proxy, &conn).await;
                return;
            }
            match conn.read(&mut buf, config.idle_interval()).await {
                Ok(UpstreamRead::Data(n)) => pending = n,
                Ok(UpstreamRead::Idle) | Ok(UpstreamRead::Eof) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn.id(), error = %e, "Upstream read failed mid-stream");
                    fail(&proxy, &conn).await;
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Err(e) = writer.stop().await {
            tracing::debug!(connection_id = %conn.id(), error = %e, "Final flush failed");
        }
        match failure {
            Some(e) => abort.abort(io::Error::other(e.to_string())).await,
            None => drop(abort),
        }
    });

    Body::from_stream(body)
}

async fn fail(proxy: &Proxy, conn: &Arc<LazyConn>) {
    proxy.discard(conn);
    conn.close().await;
}

fn tunnel_response(proxy: &Proxy, eof: bool, body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if eof {
        headers.insert(UPSTREAM_EOF, HeaderValue::from_static("true"));
    }
    if let Some(host) = &proxy.config().host {
        match HeaderValue::from_str(host) {
            Ok(value) => {
                headers.insert(PROXY_HOST, value);
            }
            Err(e) => tracing::error!(host = %host, error = %e, "Configured host is not a valid header value"),
        }
    }
    response
}

/// 502 with a diagnostic body that also asks the client to drop the connection.
pub fn bad_gateway(err: &TunnelError) -> Response {
    tracing::warn!(error = %err, "Responding bad gateway");
    let mut response = (StatusCode::BAD_GATEWAY, err.to_string()).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
