//! Error taxonomy shared by both tunnel endpoints.
//!
//! Read timeouts and clean upstream EOF are not errors here: they are
//! outcomes of a read, not failures (see [`crate::server::UpstreamRead`]).

use axum::http::StatusCode;

/// Errors produced by the tunnel client and server.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// A required protocol header was missing or not valid UTF-8.
    #[error("No {0} found in request headers")]
    MissingHeader(String),

    /// The request used a method other than GET or POST.
    #[error("Unsupported method {0}")]
    UnsupportedMethod(String),

    /// Dialing the destination (server) or the proxy (client) failed.
    #[error("Unable to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to an established socket failed.
    #[error("Upstream I/O error: {0}")]
    Upstream(#[from] std::io::Error),

    /// The HTTP exchange with the proxy failed.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A tunnel request could not be constructed.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    /// The proxy answered with something other than 200 OK.
    #[error("Proxy responded {status}: {message}")]
    Gateway { status: StatusCode, message: String },

    /// An operation exceeded its deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The logical connection is no longer accepting operations.
    #[error("Connection closed")]
    Closed,
}

impl TunnelError {
    /// Whether the error indicates the HTTP transport itself is unusable and
    /// must be redialed before the next exchange.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TunnelError::Http(_) | TunnelError::Dial { .. } | TunnelError::Timeout(_)
        )
    }
}
