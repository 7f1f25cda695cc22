//! Transport abstraction layer for Nightfall.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the network protocol, plus the request metadata captured while a client
//! upgrades ([`HandshakeInfo`]).
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::borrow::Cow;
use std::fmt;

/// Close code sent when a client fails authentication.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent when a newer connection for the same user takes over.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// Close code sent when the inactivity monitor kicks a connection.
pub const CLOSE_INACTIVE: u16 = 4001;
/// Close code sent when a connection stops answering heartbeat probes.
pub const CLOSE_HEARTBEAT_FAILED: u16 = 4002;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Request metadata captured during the upgrade handshake.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Request path including the query string, e.g. `/ws?token=abc`.
    pub path_and_query: String,
    /// Request headers as `(lower-cased name, value)` pairs.
    pub headers: Vec<(String, String)>,
}

impl HandshakeInfo {
    /// Returns the first value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the percent-decoded value of a query-string parameter.
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        let (_, query) = self.path_and_query.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| percent_decode(v))
    }

    /// Returns the percent-decoded value of a cookie from the `Cookie`
    /// header.
    pub fn cookie(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers
            .iter()
            .filter(|(k, _)| k == "cookie")
            .flat_map(|(_, v)| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| percent_decode(v))
    }
}

/// Values that do not decode to UTF-8 are kept as sent.
fn percent_decode(value: &str) -> Cow<'_, str> {
    urlencoding::decode(value).unwrap_or(Cow::Borrowed(value))
}

/// A frame read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// An application message (text or binary payload).
    Data(Vec<u8>),
    /// The peer answered a liveness ping.
    Pong,
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Returns the local address the transport is bound to.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}

/// A single connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote peer.
    ///
    /// UTF-8 payloads go out as text frames, anything else as binary.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Frame>, Self::Error>;

    /// Sends a protocol-level liveness probe.
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Closes the connection with the given close code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the request metadata captured during the upgrade.
    fn handshake(&self) -> &HandshakeInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, headers: &[(&str, &str)]) -> HandshakeInfo {
        HandshakeInfo {
            path_and_query: path.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let hs = info("/", &[("authorization", "Bearer abc")]);
        assert_eq!(hs.header("Authorization"), Some("Bearer abc"));
        assert_eq!(hs.header("x-missing"), None);
    }

    #[test]
    fn test_query_param_found_among_several() {
        let hs = info("/ws?room=3&token=xyz", &[]);
        assert_eq!(hs.query_param("token").as_deref(), Some("xyz"));
        assert_eq!(hs.query_param("room").as_deref(), Some("3"));
        assert_eq!(hs.query_param("nope"), None);
    }

    #[test]
    fn test_query_param_without_query_string() {
        let hs = info("/ws", &[]);
        assert_eq!(hs.query_param("token"), None);
    }

    #[test]
    fn test_cookie_parsed_from_header() {
        let hs = info("/", &[("cookie", "theme=dark; token=t-1; lang=en")]);
        assert_eq!(hs.cookie("token").as_deref(), Some("t-1"));
        assert_eq!(hs.cookie("lang").as_deref(), Some("en"));
        assert_eq!(hs.cookie("missing"), None);
    }

    #[test]
    fn test_query_param_and_cookie_are_percent_decoded() {
        let hs = info("/ws?token=a%2Bb%3D%3D&name=x%20y", &[("cookie", "token=c%3A1")]);
        assert_eq!(hs.query_param("token").as_deref(), Some("a+b=="));
        assert_eq!(hs.query_param("name").as_deref(), Some("x y"));
        assert_eq!(hs.cookie("token").as_deref(), Some("c:1"));
    }

    #[test]
    fn test_query_param_invalid_utf8_escape_kept_verbatim() {
        let hs = info("/ws?token=%FF", &[]);
        assert_eq!(hs.query_param("token").as_deref(), Some("%FF"));
    }
}
