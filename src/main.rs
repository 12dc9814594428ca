//! enproxy tunnel server.
//!
//! ```text
//!     enproxy-client                         enproxy                          destination
//!    ┌──────────────┐  POST (write frames)  ┌──────────────────────────┐
//!    │ Conn         │──────────────────────▶│ handler → Proxy          │
//!    │  write loop  │                       │   id → LazyConn ─────────┼────▶ TCP socket
//!    │  read loop   │◀──────────────────────│ FlushWriter (GET bodies) │
//!    └──────────────┘  GET (read frames)    └──────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use enproxy::config::{load_config, ServerConfig};
use enproxy::lifecycle::{shutdown_signal, Shutdown};
use enproxy::observability::{logging, metrics};
use enproxy::HttpServer;

#[derive(Parser)]
#[command(name = "enproxy")]
#[command(about = "HTTP tunnel server for byte streams", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!("enproxy v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let run = server.run(listener, shutdown.subscribe());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.trigger();
    });

    run.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
