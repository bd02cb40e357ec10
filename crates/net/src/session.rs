//! Session-level channel wrapper: one duplex connection, typed publish/subscribe,
//! and connection lifecycle tracking.

use crate::bus::{EventBus, EventKind, HandlerId, SessionEvent, Subscription};
use crate::channel::{ChannelManager, Inbound};
use crate::connection::{send_client_message, ClientConnection, JoinRequest, Welcome};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{ClientEndpoint, TlsMode};
use klyra_core::PlayerId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Sink for outbound messages. Sending never blocks and never acknowledges.
pub trait Publish {
    /// Whether the underlying channel is currently usable.
    fn is_connected(&self) -> bool;

    /// Hand `message` to the transport, fire-and-forget.
    fn publish(&self, message: ClientMessage);
}

/// Errors surfaced by [`NetworkSession::connect`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport could not be set up or reached the server.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    /// The server rejected the join or never confirmed it.
    #[error("handshake failed: {0:#}")]
    Handshake(anyhow::Error),
    /// `connect` was called on a live session.
    #[error("session is already connected")]
    AlreadyConnected,
}

/// Network section of the client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// Display name sent in the handshake.
    pub username: String,
    /// Character class sent in the handshake.
    pub character_class: String,
    /// Certificate policy.
    pub tls: TlsMode,
    /// How long `connect` waits for the server's confirmation.
    pub handshake_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 4433)),
            username: "wanderer".to_string(),
            character_class: "warrior".to_string(),
            tls: TlsMode::Insecure,
            handshake_timeout_ms: 5_000,
        }
    }
}

impl NetworkConfig {
    /// Join request derived from this configuration.
    pub fn join_request(&self) -> JoinRequest {
        JoinRequest {
            username: self.username.clone(),
            character_class: self.character_class.clone(),
        }
    }
}

/// Observable connection lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// True between handshake confirmation and transport loss.
    pub connected: bool,
    /// Identity assigned by the server.
    pub identity: Option<PlayerId>,
    /// Room joined.
    pub room_id: Option<String>,
}

struct Link {
    endpoint: ClientEndpoint,
    manager: Arc<ChannelManager>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<Inbound<ServerMessage>>,
    pump: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.writer.abort();
        self.pump.abort();
    }
}

/// Owns the single duplex connection of a client process.
#[derive(Default)]
pub struct NetworkSession {
    state: ConnectionState,
    bus: EventBus,
    link: Option<Link>,
}

impl NetworkSession {
    /// Create a disconnected session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect and join; resolves once the server confirms the handshake.
    ///
    /// Transport failures are returned as-is, never retried here.
    pub async fn connect(&mut self, config: &NetworkConfig) -> Result<Welcome, ConnectionError> {
        if self.state.connected {
            return Err(ConnectionError::AlreadyConnected);
        }

        let endpoint = ClientEndpoint::new(config.tls).map_err(ConnectionError::Transport)?;
        let connection = endpoint
            .connect(config.server_addr)
            .await
            .map_err(ConnectionError::Transport)?;

        let mut client = ClientConnection::new(connection);
        let timeout = Duration::from_millis(config.handshake_timeout_ms);
        let welcome = match client.handshake(&config.join_request(), timeout).await {
            Ok(welcome) => welcome,
            Err(err) => {
                client.close("handshake failed");
                return Err(ConnectionError::Handshake(err));
            }
        };

        let (manager, inbound, pump) = client.into_parts();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let writer_manager = Arc::clone(&manager);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(err) = send_client_message(&writer_manager, msg).await {
                    warn!("Dropping outbound message: {:#}", err);
                }
            }
        });

        self.state = ConnectionState {
            connected: true,
            identity: Some(welcome.player_id),
            room_id: welcome.room_id.clone(),
        };
        self.link = Some(Link {
            endpoint,
            manager,
            outbound,
            inbound,
            pump,
            writer,
        });

        info!(
            "Session established as {} in room {:?}",
            welcome.player_id, welcome.room_id
        );

        Ok(welcome)
    }

    /// Register an independent subscriber for `kind`.
    pub fn subscribe(&mut self, kind: EventKind) -> Subscription {
        self.bus.subscribe(kind)
    }

    /// Remove exactly the subscriber identified by `id`.
    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Identity assigned by the server, while connected.
    pub fn identity(&self) -> Option<PlayerId> {
        self.state.identity
    }

    /// Wait for the next inbound event and dispatch it to subscribers.
    ///
    /// Returns `None` immediately when there is no live connection. Transport
    /// loss yields one synthetic [`SessionEvent::Disconnected`].
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let item = match self.link.as_mut() {
            Some(link) => link.inbound.recv().await,
            None => return None,
        };
        Some(self.handle_inbound(item))
    }

    /// Drain and dispatch every inbound event that already arrived.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            let item = match self.link.as_mut() {
                Some(link) => match link.inbound.try_recv() {
                    Ok(item) => Some(item),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => None,
                },
                None => break,
            };
            events.push(self.handle_inbound(item));
        }
        events
    }

    /// Send a disconnect notice, close the transport and reset the state.
    pub async fn disconnect(&mut self, reason: &str) {
        let Some(link) = self.link.take() else {
            return;
        };

        let notice = ClientMessage::Disconnect {
            reason: reason.to_string(),
        };
        let send = send_client_message(&link.manager, notice);
        if tokio::time::timeout(Duration::from_millis(250), send)
            .await
            .is_err()
        {
            debug!("Disconnect notice not flushed before close");
        }

        link.manager.close(reason);
        link.endpoint.close();
        drop(link);

        self.reset(reason);
    }

    fn handle_inbound(&mut self, item: Option<Inbound<ServerMessage>>) -> SessionEvent {
        let event = match item {
            Some(Inbound::Message(channel, msg)) => {
                match &msg {
                    ServerMessage::Kicked { reason } => warn!("Kicked: {}", reason),
                    ServerMessage::ServerShutdown { message } => {
                        warn!("Server shutdown: {}", message)
                    }
                    ServerMessage::Disconnect { reason } => {
                        info!("Server disconnect notice: {}", reason)
                    }
                    _ => trace!("Inbound message on {:?}", channel),
                }
                SessionEvent::Server(msg)
            }
            Some(Inbound::Closed(reason)) => {
                warn!("Disconnected from server: {}", reason);
                self.link = None;
                self.reset_state();
                SessionEvent::Disconnected { reason }
            }
            None => {
                let reason = "inbound pump stopped".to_string();
                warn!("Disconnected from server: {}", reason);
                self.link = None;
                self.reset_state();
                SessionEvent::Disconnected { reason }
            }
        };
        self.bus.dispatch(&event);
        event
    }

    fn reset(&mut self, reason: &str) {
        self.reset_state();
        self.bus.dispatch(&SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
        info!("Session closed: {}", reason);
    }

    fn reset_state(&mut self) {
        self.state = ConnectionState::default();
    }
}

impl Publish for NetworkSession {
    fn is_connected(&self) -> bool {
        self.state.connected
    }

    fn publish(&self, message: ClientMessage) {
        match &self.link {
            Some(link) if self.state.connected => {
                if link.outbound.send(message).is_err() {
                    debug!("Writer task gone; outbound message dropped");
                }
            }
            _ => debug!("Not connected; dropping {:?}", message),
        }
    }
}
