//! WebSocket transport channel between a client session and the relay.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, optional reconnect)
//! - Non-blocking, best-effort `send_location`
//! - Inbound relay messages as `ChannelEvent`s, in arrival order
//!
//! Nothing is queued across a disconnect. Messages sent while no socket is
//! open, including while a reconnect handshake is in flight, are dropped.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::protocol::{ClientMessage, ParticipantId, Position, ProtocolError, RelayMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the transport channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake complete; `identity` is this channel's relay-assigned identity.
    Connected { identity: ParticipantId },
    /// Position published by another participant.
    Location {
        identity: ParticipantId,
        position: Position,
    },
    /// Another participant's channel closed (relay must announce departures).
    ParticipantLeft { identity: ParticipantId },
    /// Connectivity lost.
    Disconnected,
}

impl From<RelayMessage> for ChannelEvent {
    fn from(msg: RelayMessage) -> Self {
        match msg {
            RelayMessage::Welcome { identity } => ChannelEvent::Connected { identity },
            RelayMessage::ReceiveLocation { identity, position } => {
                ChannelEvent::Location { identity, position }
            }
            RelayMessage::ParticipantLeft { identity } => ChannelEvent::ParticipantLeft { identity },
        }
    }
}

/// Cloneable sending half of the channel.
#[derive(Clone)]
pub struct TransportHandle {
    outgoing: mpsc::Sender<ClientMessage>,
    state: Arc<RwLock<ConnectionState>>,
}

impl TransportHandle {
    /// Wrap an existing outbound queue. The consumer of `outgoing` decides
    /// what happens to queued messages.
    pub fn from_sender(outgoing: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            outgoing,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    /// Queue a position for the relay without waiting.
    ///
    /// Returns whether it was queued. A full or closed queue drops it.
    pub fn send_location(&self, position: Position) -> bool {
        match self.outgoing.try_send(ClientMessage::SendLocation(position)) {
            Ok(()) => true,
            Err(e) => {
                log::trace!("Dropping outbound location: {e}");
                false
            }
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

/// Connect to the relay at `config.server_url`.
///
/// The first connection attempt happens inline and its failure is returned.
/// After that a background task owns the socket and, when
/// `config.reconnect` is set, reconnects after each drop.
pub async fn connect(
    config: &ClientConfig,
) -> Result<(TransportHandle, mpsc::Receiver<ChannelEvent>), ProtocolError> {
    let state = Arc::new(RwLock::new(ConnectionState::Connecting));

    let ws = match tokio_tungstenite::connect_async(config.server_url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            log::warn!("Connecting to {} failed: {e}", config.server_url);
            return Err(ProtocolError::ConnectionFailed(e.to_string()));
        }
    };
    log::info!("Connected to relay at {}", config.server_url);

    let (out_tx, out_rx) = mpsc::channel(config.event_buffer.max(1));
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));

    tokio::spawn(supervise(config.clone(), ws, out_rx, event_tx, state.clone()));

    Ok((
        TransportHandle {
            outgoing: out_tx,
            state,
        },
        event_rx,
    ))
}

/// Why a connection pump returned.
enum PumpExit {
    /// Socket closed or failed.
    Lost,
    /// Every handle or the event consumer is gone.
    Shutdown,
}

async fn supervise(
    config: ClientConfig,
    first: WsStream,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<ChannelEvent>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let mut next = Some(first);
    loop {
        if let Some(ws) = next.take() {
            *state.write().await = ConnectionState::Connected;
            let exit = pump(ws, &mut outgoing, &events).await;
            *state.write().await = ConnectionState::Disconnected;

            if matches!(exit, PumpExit::Shutdown) || events.send(ChannelEvent::Disconnected).await.is_err() {
                log::debug!("Transport shut down");
                return;
            }
            log::info!("Disconnected from relay at {}", config.server_url);
        }

        if !config.reconnect {
            return;
        }
        *state.write().await = ConnectionState::Reconnecting;
        let delay = tokio::time::sleep(config.reconnect_delay());
        if drop_outbound_until(delay, &mut outgoing).await.is_none() {
            return;
        }

        let attempt = tokio_tungstenite::connect_async(config.server_url.as_str());
        match drop_outbound_until(attempt, &mut outgoing).await {
            Some(Ok((ws, _))) => {
                log::info!("Reconnected to relay at {}", config.server_url);
                next = Some(ws);
            }
            Some(Err(e)) => log::warn!("Reconnecting to {} failed: {e}", config.server_url),
            None => return,
        }
    }
}

/// Drive `fut` to completion, dropping outbound messages meanwhile.
///
/// Whatever is still queued when `fut` finishes is dropped too. Returns
/// `None` once every handle is gone.
async fn drop_outbound_until<F: Future>(
    fut: F,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => {
                while outgoing.try_recv().is_ok() {
                    log::trace!("Channel not open; dropping outbound message");
                }
                return Some(out);
            }
            msg = outgoing.recv() => match msg {
                Some(_) => log::trace!("Channel not open; dropping outbound message"),
                None => return None,
            },
        }
    }
}

async fn pump(
    ws: WsStream,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
    events: &mpsc::Sender<ChannelEvent>,
) -> PumpExit {
    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            msg = outgoing.recv() => match msg {
                Some(msg) => match msg.encode() {
                    Ok(text) => {
                        if let Err(e) = writer.send(Message::Text(text.into())).await {
                            log::debug!("Send failed: {e}");
                            return PumpExit::Lost;
                        }
                    }
                    Err(e) => log::warn!("Failed to encode outbound message: {e}"),
                },
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            },

            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match RelayMessage::decode(text.as_str()) {
                    Ok(msg) => {
                        if events.send(ChannelEvent::from(msg)).await.is_err() {
                            let _ = writer.send(Message::Close(None)).await;
                            return PumpExit::Shutdown;
                        }
                    }
                    Err(e) => log::warn!("Dropping malformed relay frame: {e}"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if writer.send(Message::Pong(data)).await.is_err() {
                        return PumpExit::Lost;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PumpExit::Lost,
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {e}");
                    return PumpExit::Lost;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
