//! Error types for the session layer.

use nightfall_protocol::UserId;
use nightfall_transport::ConnectionId;

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The handshake carried no credential in any accepted location.
    #[error("no credential presented")]
    MissingCredential,

    /// No registry entry exists for the connection.
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// The connection's writer task has gone away.
    #[error("connection {0} is closed")]
    SinkClosed(ConnectionId),

    /// No reconnection record exists, or it has outlived its window.
    #[error("no stored state for {0}")]
    NoStoredState(UserId),
}
