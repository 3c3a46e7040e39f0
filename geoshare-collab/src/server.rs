//! WebSocket relay: assigns identities and fans locations out.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌──► Client B
//!            ├── send-location ── Relay ┤
//! Client C ──┘   (identity stamped)     └──► Client C (not back to A)
//!                                       │
//!                                 FanoutGroup (tokio broadcast)
//! ```
//!
//! The relay keeps no positions. Each connection gets a fresh identity, a
//! `welcome` frame carrying it, and every `receive-location` published by the
//! other connections. A client cannot choose the identity its positions are
//! published under.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::{FanoutGroup, RelayFrame};
use crate::config::RelayConfig;
use crate::protocol::{ClientMessage, ParticipantId, RelayMessage};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    /// `send-location` messages accepted and fanned out
    pub messages_relayed: u64,
    /// Inbound frames dropped as malformed
    pub messages_rejected: u64,
    /// Frames slow channels skipped
    pub lagged_messages: u64,
    pub active_channels: usize,
}

/// Shared state handed to every connection task.
#[derive(Clone)]
struct RelayContext {
    config: RelayConfig,
    group: Arc<FanoutGroup>,
    stats: Arc<RwLock<RelayStats>>,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    group: Arc<FanoutGroup>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let group = Arc::new(FanoutGroup::new(config.broadcast_capacity));
        Self {
            config,
            group,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind `config.bind_addr` and serve. Only binding can fail.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections from an already bound listener.
    ///
    /// A failed `accept` (e.g. out of file descriptors) is logged and the
    /// loop keeps going after a short pause.
    pub async fn serve(&self, listener: TcpListener) {
        let incoming = futures_util::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        });
        self.serve_incoming(incoming).await;
    }

    async fn serve_incoming<S>(&self, incoming: S)
    where
        S: Stream<Item = io::Result<(TcpStream, SocketAddr)>>,
    {
        tokio::pin!(incoming);
        while let Some(accepted) = incoming.next().await {
            let (stream, addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("TCP accept error: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let ctx = RelayContext {
                config: self.config.clone(),
                group: self.group.clone(),
                stats: self.stats.clone(),
            };

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, ctx).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle one WebSocket connection from handshake to cleanup.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: RelayContext,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let identity = ParticipantId::generate();
        let Some(rx) = ctx
            .group
            .join(identity.clone(), ctx.config.max_participants)
            .await
        else {
            log::warn!(
                "Rejecting {addr}: relay full ({} participants)",
                ctx.config.max_participants
            );
            let frame = CloseFrame {
                code: CloseCode::Again,
                reason: "relay full".into(),
            };
            let _ = ws_sender.send(Message::Close(Some(frame))).await;
            return Ok(());
        };

        {
            let mut s = ctx.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_channels = ctx.group.channel_count().await;
        }
        log::info!("Participant {identity} connected from {addr}");

        let result = Self::relay_loop(&identity, ws_sender, ws_receiver, rx, &ctx).await;

        // Cleanup runs however the loop ended.
        ctx.group.leave(&identity).await;
        if ctx.config.announce_departures {
            let left = RelayMessage::ParticipantLeft {
                identity: identity.clone(),
            };
            if let Err(e) = ctx.group.publish(&identity, &left) {
                log::warn!("Failed to announce departure of {identity}: {e}");
            }
        }
        {
            let mut s = ctx.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_channels = ctx.group.channel_count().await;
        }
        log::info!("Participant {identity} disconnected");

        result
    }

    async fn relay_loop(
        identity: &ParticipantId,
        mut ws_sender: WsSink,
        mut ws_receiver: WsSource,
        mut rx: broadcast::Receiver<Arc<RelayFrame>>,
        ctx: &RelayContext,
    ) -> Result<(), BoxError> {
        let welcome = RelayMessage::Welcome {
            identity: identity.clone(),
        };
        ws_sender.send(Message::Text(welcome.encode()?.into())).await?;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match ClientMessage::decode(text.as_str()) {
                                Ok(ClientMessage::SendLocation(position)) => {
                                    let out = RelayMessage::ReceiveLocation {
                                        identity: identity.clone(),
                                        position,
                                    };
                                    ctx.group.publish(identity, &out)?;
                                    ctx.stats.write().await.messages_relayed += 1;
                                }
                                Err(e) => {
                                    log::warn!("Dropping malformed message from {identity}: {e}");
                                    ctx.stats.write().await.messages_rejected += 1;
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("Dropping binary frame from {identity}");
                            ctx.stats.write().await.messages_rejected += 1;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed by {identity}");
                            return Ok(());
                        }

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {identity}: {e}");
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                // Outgoing fan-out frame
                frame = rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            if frame.is_for(identity) {
                                ws_sender.send(Message::Text(frame.text.clone().into())).await?;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Participant {identity} lagged by {n} frames");
                            ctx.group.record_lag(n);
                            ctx.stats.write().await.lagged_messages += n;
                        }
                        Err(RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Number of currently open channels.
    pub async fn channel_count(&self) -> usize {
        self.group.channel_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_creation() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn test_relay_custom_config() {
        let config = RelayConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_participants: 5,
            broadcast_capacity: 16,
            announce_departures: true,
        };
        let server = RelayServer::new(config.clone());
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(server.config(), &config);
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.messages_relayed, 0);
        assert_eq!(stats.messages_rejected, 0);
        assert_eq!(stats.lagged_messages, 0);
        assert_eq!(stats.active_channels, 0);
        assert_eq!(server.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_fails_on_bad_address() {
        let server = RelayServer::new(RelayConfig {
            bind_addr: "not-an-address".to_string(),
            ..RelayConfig::default()
        });
        assert!(server.run().await.is_err());
    }

    #[tokio::test]
    async fn test_accept_error_does_not_stop_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // One failed accept ahead of the real listener.
        let failure = futures_util::stream::iter([Err(io::Error::from_raw_os_error(24))]);
        let real = futures_util::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        });

        let server = Arc::new(RelayServer::with_defaults());
        let serving = server.clone();
        tokio::spawn(async move { serving.serve_incoming(failure.chain(real)).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for welcome")
            .expect("connection ended")
            .expect("websocket error");
        match frame {
            Message::Text(text) => assert!(matches!(
                RelayMessage::decode(text.as_str()),
                Ok(RelayMessage::Welcome { .. })
            )),
            other => panic!("Expected welcome, got {other:?}"),
        }
        assert_eq!(server.stats().await.total_connections, 1);
    }
}
