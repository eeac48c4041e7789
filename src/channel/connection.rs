//! Process-wide push-channel connection.
//!
//! One [`PushChannel`] owns the WebSocket. A reader task decodes frames and
//! fans events out on a broadcast channel; a writer task serializes control
//! messages. Sessions never touch the socket directly: each one holds a
//! [`Subscription`] that it can close on its own, so several sessions can
//! share a connection during a navigation transition.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::codec::{self, ChannelEvent, Frame, Protocol};
use super::ChannelError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events buffered per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Configuration for the push channel.
#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    pub url: String,
    pub protocol: Protocol,
    pub connect_timeout: Duration,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000".to_string(),
            protocol: Protocol::SocketIo,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct Connection {
    endpoint: String,
    outgoing: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<ChannelEvent>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }
}

/// WebSocket client for the backend's push events.
pub struct PushChannel {
    config: PushChannelConfig,
    connection: Option<Connection>,
}

impl PushChannel {
    pub fn new(config: PushChannelConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_alive)
    }

    /// Open the socket, completing the Socket.IO handshake when needed.
    /// A no-op while an earlier connection is still alive.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.is_connected() {
            return Ok(());
        }
        self.disconnect();

        let endpoint = endpoint_url(&self.config.url, self.config.protocol)?;
        let timeout = self.config.connect_timeout;
        info!("Connecting to push channel at {}", endpoint);

        let (mut ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(endpoint.as_str()))
            .await
            .map_err(|_| ChannelError::ConnectTimeout(endpoint.clone()))?
            .map_err(|e| ChannelError::Connect(endpoint.clone(), e.to_string()))?;

        if self.config.protocol == Protocol::SocketIo {
            tokio::time::timeout(timeout, socketio_handshake(&mut ws))
                .await
                .map_err(|_| ChannelError::ConnectTimeout(endpoint.clone()))??;
        }

        let (sink, stream) = ws.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        tokio::spawn(write_loop(sink, outgoing_rx));
        let reader = tokio::spawn(read_loop(
            stream,
            self.config.protocol,
            events.clone(),
            outgoing.clone(),
        ));

        info!("Push channel connected");
        self.connection = Some(Connection {
            endpoint,
            outgoing,
            events,
            reader,
        });
        Ok(())
    }

    /// Subscribe to events for one session.
    ///
    /// The receiver is registered before the `subscribe` control message is
    /// sent, so nothing the server pushes in response can be missed.
    pub fn subscribe(&self, session_id: &str) -> Result<Subscription, ChannelError> {
        let connection = self
            .connection
            .as_ref()
            .filter(|c| c.is_alive())
            .ok_or(ChannelError::NotConnected)?;

        let receiver = connection.events.subscribe();
        let frame = codec::encode_event(
            self.config.protocol,
            "subscribe",
            &json!({ "patient_id": session_id }),
        );
        connection
            .outgoing
            .send(Message::text(frame))
            .map_err(|_| ChannelError::NotConnected)?;

        debug!("Subscribed to session {} on {}", session_id, connection.endpoint);
        Ok(Subscription::new(session_id, receiver))
    }

    /// Close the socket. Safe to call repeatedly, or without a connection.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!("Disconnecting from {}", connection.endpoint);
            let _ = connection.outgoing.send(Message::Close(None));
            connection.reader.abort();
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// One session's view of the push channel.
#[derive(Debug)]
pub struct Subscription {
    session_id: String,
    receiver: Option<broadcast::Receiver<ChannelEvent>>,
}

impl Subscription {
    pub(crate) fn new(session_id: &str, receiver: broadcast::Receiver<ChannelEvent>) -> Self {
        Self {
            session_id: session_id.to_string(),
            receiver: Some(receiver),
        }
    }

    #[allow(dead_code)] // Utility for callers juggling several subscriptions
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[allow(dead_code)] // Utility for callers juggling several subscriptions
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Next event for this session.
    ///
    /// Events addressed to other sessions are skipped. Returns `Lagged`
    /// when events were dropped for this receiver, `Disconnected` once if
    /// the connection goes away, and `None` after [`close`](Self::close).
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) if event.belongs_to(&self.session_id) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Session {} lagged, {} events dropped", self.session_id, skipped);
                    return Some(ChannelEvent::Lagged { skipped });
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return Some(ChannelEvent::Disconnected);
                }
            }
        }
    }

    /// Stop receiving. Idempotent; the shared connection stays open.
    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            debug!("Closed subscription for session {}", self.session_id);
        }
    }
}

/// Build the WebSocket endpoint from a configured base URL.
pub fn endpoint_url(base: &str, protocol: Protocol) -> Result<String, ChannelError> {
    let mut url = Url::parse(base).map_err(|e| ChannelError::InvalidUrl(base.to_string(), e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChannelError::InvalidUrl(
                base.to_string(),
                format!("unsupported scheme '{}'", other),
            ))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::InvalidUrl(base.to_string(), "cannot set scheme".to_string()))?;

    if protocol == Protocol::SocketIo {
        if !url.path().contains("socket.io") {
            url.set_path("/socket.io/");
        }
        let has_eio = url.query_pairs().any(|(k, _)| k == "EIO");
        if !has_eio {
            url.query_pairs_mut()
                .append_pair("EIO", "4")
                .append_pair("transport", "websocket");
        }
    }

    Ok(url.to_string())
}

/// Wait for the Engine.IO open packet, join the default namespace and wait
/// for the acknowledgement.
async fn socketio_handshake(ws: &mut WsStream) -> Result<(), ChannelError> {
    while let Some(message) = ws.next().await {
        let message = message.map_err(|e| ChannelError::Handshake(e.to_string()))?;
        let Message::Text(text) = message else {
            continue;
        };

        match codec::decode(Protocol::SocketIo, text.as_str())? {
            Frame::Open => {
                ws.send(Message::text(codec::NAMESPACE_CONNECT.to_string()))
                    .await
                    .map_err(|e| ChannelError::Handshake(e.to_string()))?;
            }
            Frame::NamespaceConnected => return Ok(()),
            Frame::Ping => {
                ws.send(Message::text(codec::PONG.to_string()))
                    .await
                    .map_err(|e| ChannelError::Handshake(e.to_string()))?;
            }
            Frame::Close => {
                return Err(ChannelError::Handshake("server closed the session".to_string()))
            }
            Frame::Event(event) => debug!("Event before namespace connect: {:?}", event),
            Frame::Ignored => {}
        }
    }

    Err(ChannelError::Handshake(
        "connection closed during handshake".to_string(),
    ))
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    protocol: Protocol,
    events: broadcast::Sender<ChannelEvent>,
    outgoing: mpsc::UnboundedSender<Message>,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                debug!("Push channel closed by server: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Push channel read error: {}", e);
                break;
            }
        };

        match codec::decode(protocol, text.as_str()) {
            Ok(Frame::Event(event)) => {
                debug!("Push event: {:?}", event);
                // No receivers is fine
                let _ = events.send(event);
            }
            Ok(Frame::Ping) => {
                let _ = outgoing.send(Message::text(codec::PONG.to_string()));
            }
            Ok(Frame::Close) => break,
            Ok(_) => {}
            Err(e) => warn!("Skipping malformed push frame: {}", e),
        }
    }

    info!("Push channel disconnected");
    let _ = events.send(ChannelEvent::Disconnected);
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("Push channel write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}
