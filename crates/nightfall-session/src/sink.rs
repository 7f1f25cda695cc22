//! The outbound half of a connection as seen by everything but its writer.
//!
//! Registries never touch sockets. Each admitted connection has a writer
//! task draining an unbounded channel; a [`ConnectionSink`] is the sending
//! side of that channel. Sending never blocks, so one slow client cannot
//! stall a broadcast.

use std::sync::Arc;

use nightfall_protocol::{ServerEnvelope, ServerMessage};
use nightfall_transport::ConnectionId;
use tokio::sync::mpsc;

use crate::SessionError;

/// Work for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An encoded-on-write message. Shared so broadcasts build it once.
    Message(Arc<ServerEnvelope>),
    /// A protocol-level liveness probe.
    Ping,
    /// Close the socket with a code and stop writing.
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct ConnectionSink {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionSink {
    /// Creates a sink and the receiver its writer task drains.
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, message: ServerMessage) -> Result<(), SessionError> {
        self.send_envelope(Arc::new(ServerEnvelope::new(message)))
    }

    pub fn send_envelope(&self, envelope: Arc<ServerEnvelope>) -> Result<(), SessionError> {
        self.push(Outbound::Message(envelope))
    }

    pub fn ping(&self) -> Result<(), SessionError> {
        self.push(Outbound::Ping)
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), SessionError> {
        self.push(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }

    /// `true` once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, item: Outbound) -> Result<(), SessionError> {
        self.tx.send(item).map_err(|_| SessionError::SinkClosed(self.id))
    }
}
