//! Header names and helpers for reading them off requests and responses.

use axum::http::{HeaderMap, HeaderName};

use crate::error::TunnelError;

/// Identifies the logical tunnel. Required on every request.
pub const CONNECTION_ID: HeaderName = HeaderName::from_static("connection-id");

/// `host:port` the server must dial for this tunnel.
pub const DESTINATION_ADDRESS: HeaderName = HeaderName::from_static("destination-address");

/// Set to `true` on a GET response once the upstream socket has ended.
pub const UPSTREAM_EOF: HeaderName = HeaderName::from_static("upstream-eof");

/// Host that is guaranteed to reach the server instance owning this tunnel.
pub const PROXY_HOST: HeaderName = HeaderName::from_static("proxy-host");

/// Fetch a required, non-empty header as a string.
pub fn required(headers: &HeaderMap, name: &HeaderName) -> Result<String, TunnelError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| TunnelError::MissingHeader(name.as_str().to_owned()))
}

/// Whether a response advertises upstream EOF.
pub fn upstream_eof(headers: &HeaderMap) -> bool {
    headers
        .get(&UPSTREAM_EOF)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// The proxy host advertised by a response, if any.
pub fn proxy_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&PROXY_HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn required_rejects_missing_and_blank() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            required(&headers, &CONNECTION_ID),
            Err(TunnelError::MissingHeader(ref name)) if name == "connection-id"
        ));

        headers.insert(CONNECTION_ID, HeaderValue::from_static("  "));
        assert!(required(&headers, &CONNECTION_ID).is_err());

        headers.insert(CONNECTION_ID, HeaderValue::from_static("abc"));
        assert_eq!(required(&headers, &CONNECTION_ID).unwrap(), "abc");
    }

    #[test]
    fn eof_flag_only_for_true() {
        let mut headers = HeaderMap::new();
        assert!(!upstream_eof(&headers));
        headers.insert(UPSTREAM_EOF, HeaderValue::from_static("false"));
        assert!(!upstream_eof(&headers));
        headers.insert(UPSTREAM_EOF, HeaderValue::from_static("true"));
        assert!(upstream_eof(&headers));
    }
}
