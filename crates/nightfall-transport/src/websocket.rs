//! WebSocket transport implementation using `tokio-tungstenite`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{
    Connection, ConnectionId, Frame, HandshakeInfo, Transport, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on how long a client may take to complete the upgrade.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;

        let mut handshake = HandshakeInfo::default();
        let upgrade = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                handshake = capture_request(req);
                Ok(resp)
            },
        );
        let ws = tokio::time::timeout(UPGRADE_TIMEOUT, upgrade)
            .await
            .map_err(|_| {
                TransportError::Handshake("upgrade timed out".into())
            })?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, path = %handshake.path_and_query, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            handshake,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

fn capture_request(req: &Request) -> HandshakeInfo {
    HandshakeInfo {
        path_and_query: req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| {
                    (name.as_str().to_ascii_lowercase(), v.to_string())
                })
            })
            .collect(),
    }
}

/// A single WebSocket connection.
///
/// The stream is split so a pending `recv` never blocks `send`, `ping`
/// or `close` issued from another task.
pub struct WebSocketConnection {
    id: ConnectionId,
    handshake: HandshakeInfo,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::ConnectionClosed(format!("{} closed", self.id))
            }
            e => TransportError::Send(e.to_string()),
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(data.to_vec().into()),
        };
        self.send_message(msg).await
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Data(data.to_vec())));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Data(text.as_bytes().to_vec())));
                }
                Some(Ok(Message::Pong(_))) => return Ok(Some(Frame::Pong)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // client pings are answered by tungstenite
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
            }
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.send_message(Message::Ping(Vec::<u8>::new().into())).await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), Self::Error> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.send_message(Message::Close(Some(frame))).await
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn handshake(&self) -> &HandshakeInfo {
        &self.handshake
    }
}
