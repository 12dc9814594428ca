//! End-to-end tests: tunnel client, tunnel server and real TCP backends.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use enproxy::config::TunnelConfig;
use enproxy::{Client, TunnelError};

use common::*;

#[tokio::test]
async fn http_request_through_tunnel() {
    let backend = start_mock_backend("hello through the tunnel").await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let conn = client(proxy).connect(&backend.to_string()).await.unwrap();
    let n = conn.write(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    assert_eq!(n, 18);

    let response = String::from_utf8(read_to_end(&conn).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "got {response:?}");
    assert!(response.ends_with("hello through the tunnel"));

    // EOF is sticky.
    let mut buf = [0u8; 16];
    assert_eq!(conn.read(&mut buf).await.unwrap(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn reads_after_eof_send_no_requests() {
    let backend = start_mock_backend("done").await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let dialer = Arc::new(CountingDialer::default());
    let gets = Arc::clone(&dialer.gets);
    let conn = Client::with_dialer(client_config(proxy), dialer)
        .connect(&backend.to_string())
        .await
        .unwrap();
    conn.write(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    assert!(read_to_end(&conn).await.ends_with(b"done"));

    let sent = gets.load(Ordering::SeqCst);
    assert!(sent > 0);

    let mut buf = [0u8; 16];
    for _ in 0..3 {
        assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gets.load(Ordering::SeqCst), sent);

    shutdown.trigger();
}

#[tokio::test]
async fn bytes_arrive_in_write_order() {
    let backend = start_echo_backend().await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let conn = Arc::new(client(proxy).connect(&backend.to_string()).await.unwrap());
    let expected: Vec<u8> = (0..50u32).flat_map(|i| format!("chunk-{i:03};").into_bytes()).collect();

    let reader = {
        let conn = Arc::clone(&conn);
        let total = expected.len();
        tokio::spawn(async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while received.len() < total {
                let n = conn.read(&mut buf).await.unwrap();
                assert!(n > 0, "unexpected EOF after {} bytes", received.len());
                received.extend_from_slice(&buf[..n]);
            }
            received
        })
    };

    for i in 0..50u32 {
        conn.write(format!("chunk-{i:03};").as_bytes()).await.unwrap();
    }

    let received = tokio::time::timeout(Duration::from_secs(10), reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);

    conn.close();
    shutdown.trigger();
}

#[tokio::test]
async fn advertised_host_pins_the_tunnel() {
    let backend = start_echo_backend().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = listener.local_addr().unwrap();

    let config = enproxy::ServerConfig {
        tunnel: TunnelConfig {
            host: Some(server.to_string()),
            ..tunnel_config()
        },
        ..enproxy::ServerConfig::default()
    };
    let shutdown = enproxy::Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(enproxy::HttpServer::new(config).run(listener, rx));

    // The client only knows the front; the server advertises itself.
    let (front, accepted) = start_counting_forwarder(server).await;
    let conn = client(front).connect(&backend.to_string()).await.unwrap();
    assert_eq!(conn.proxy_host(), Some(server.to_string()));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    for round in 0..3u8 {
        let message = [b'p', b'i', b'n', b'0' + round];
        conn.write(&message).await.unwrap();
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            filled += conn.read(&mut buf[filled..]).await.unwrap();
        }
        assert_eq!(buf, message);
    }

    // Every request after the first went straight to the pinned host.
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    conn.close();
    shutdown.trigger();
}

#[tokio::test]
async fn connect_fails_for_unreachable_destination() {
    let destination = unused_addr().await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let err = client(proxy).connect(&destination.to_string()).await.unwrap_err();
    match err {
        TunnelError::Gateway { status, message } => {
            assert_eq!(status.as_u16(), 502);
            assert!(message.contains(&destination.to_string()), "got {message:?}");
        }
        other => panic!("expected gateway error, got {other:?}"),
    }

    shutdown.trigger();
}

#[tokio::test]
async fn connect_fails_without_server() {
    let proxy = unused_addr().await;
    let err = client(proxy).connect("127.0.0.1:9").await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}

#[tokio::test]
async fn idle_tunnel_shuts_down() {
    let backend = start_silent_backend().await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let config = enproxy::ClientConfig {
        idle_interval_ms: 100,
        idle_timeout_ms: 300,
        ..client_config(proxy)
    };
    let conn = Client::new(config).connect(&backend.to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(matches!(conn.write(b"late").await, Err(TunnelError::Closed)));

    shutdown.trigger();
}

#[tokio::test]
async fn closed_conn_reads_eof_and_rejects_writes() {
    let backend = start_silent_backend().await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let conn = client(proxy).connect(&backend.to_string()).await.unwrap();
    conn.close();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(matches!(conn.write(b"late").await, Err(TunnelError::Closed)));

    shutdown.trigger();
}

#[tokio::test]
async fn raw_request_without_headers_is_rejected() {
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;

    let response = reqwest::Client::new()
        .get(format!("http://{proxy}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
    assert_eq!(response.headers()["connection"], "close");
    let body = response.text().await.unwrap();
    assert!(body.contains("connection-id"), "got {body:?}");

    shutdown.trigger();
}

#[tokio::test]
async fn raw_gets_on_quiet_upstream_are_empty() {
    let backend = start_silent_backend().await;
    let (proxy, shutdown) = start_tunnel_server(tunnel_config()).await;
    let http = reqwest::Client::new();

    for _ in 0..2 {
        let response = http
            .get(format!("http://{proxy}/"))
            .header("Connection-Id", "raw-quiet")
            .header("Destination-Address", backend.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(response.headers().get("upstream-eof").is_none());
        assert!(response.bytes().await.unwrap().is_empty());
    }

    shutdown.trigger();
}
