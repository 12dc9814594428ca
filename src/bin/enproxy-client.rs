//! Local TCP front end for the tunnel client.
//!
//! Every connection accepted on `--listen` is tunneled to `--destination`
//! through the tunnel server at `--proxy`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use enproxy::config::{load_client_config, ClientConfig};
use enproxy::lifecycle::shutdown_signal;
use enproxy::observability::logging;
use enproxy::{Client, Conn, TunnelError};

#[derive(Parser)]
#[command(name = "enproxy-client")]
#[command(about = "Tunnel local TCP connections over HTTP", long_about = None)]
struct Args {
    /// Local address to accept connections on
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Tunnel server address (overrides the config file)
    #[arg(short, long)]
    proxy: Option<String>,

    /// Destination `host:port` reached through the tunnel
    #[arg(short, long)]
    destination: String,

    /// Path to a TOML client config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init_logging("enproxy=info");

    let mut config = match &args.config {
        Some(path) => load_client_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(proxy) = args.proxy {
        config.proxy_address = proxy;
    }

    let listener = TcpListener::bind(&args.listen).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        proxy = %config.proxy_address,
        destination = %args.destination,
        "Accepting local connections"
    );

    let buffer_size = config.buffer_size;
    let client = Client::new(config);
    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut signal => break,
        };
        let client = client.clone();
        let destination = args.destination.clone();
        tokio::spawn(async move {
            match client.connect(&destination).await {
                Ok(conn) => {
                    tracing::debug!(peer = %peer, connection_id = %conn.id(), "Tunnel opened");
                    pump(stream, Arc::new(conn), buffer_size).await;
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "Failed to open tunnel"),
            }
        });
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Copy bytes both ways until the tunneled stream ends.
async fn pump(stream: TcpStream, conn: Arc<Conn>, buffer_size: usize) {
    let (mut local_read, mut local_write) = stream.into_split();

    let outbound = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            loop {
                let n = local_read.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<_, TunnelError>(());
                }
                conn.write(&buf[..n]).await?;
            }
        })
    };

    let mut buf = vec![0u8; buffer_size];
    let inbound: Result<(), TunnelError> = async {
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            local_write.write_all(&buf[..n]).await?;
        }
    }
    .await;

    if let Err(e) = inbound {
        tracing::debug!(connection_id = %conn.id(), error = %e, "Inbound copy ended");
    }
    let _ = local_write.shutdown().await;
    outbound.abort();
    conn.close();
}
