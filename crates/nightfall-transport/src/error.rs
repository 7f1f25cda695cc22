use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The WebSocket upgrade was rejected, malformed, or too slow.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer is gone; nothing more can be sent or received.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}
