//! High-level connection management integrating transport, channels, and protocol.
//!
//! Provides a unified interface for sending/receiving typed messages.

use crate::channel::{spawn_inbound, ChannelManager, ChannelType, Inbound};
use crate::codec::{
    compute_schema_hash, decode_client_message, decode_server_message, encode_client_message,
    encode_server_message,
};
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use anyhow::Result;
use klyra_core::PlayerId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the client asks for when joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Display name.
    pub username: String,
    /// Selected character class.
    pub character_class: String,
}

/// Server confirmation of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    /// Identity assigned to this client.
    pub player_id: PlayerId,
    /// Room the client joined.
    pub room_id: Option<String>,
}

/// Client-side connection wrapping QUIC transport and protocol handling.
pub struct ClientConnection {
    channel_manager: Arc<ChannelManager>,
    inbound: mpsc::UnboundedReceiver<Inbound<ServerMessage>>,
    pump: JoinHandle<()>,
    schema_hash: u64,
}

impl ClientConnection {
    /// Create a new client connection from a QUIC connection.
    pub fn new(connection: quinn::Connection) -> Self {
        let (inbound, pump) = spawn_inbound(connection.clone(), decode_server_message);
        Self {
            channel_manager: Arc::new(ChannelManager::new(connection)),
            inbound,
            pump,
            schema_hash: compute_schema_hash(),
        }
    }

    /// Perform handshake with server.
    ///
    /// Resolves once the server confirms the join, or fails on rejection,
    /// transport loss, or when no confirmation arrives within `timeout`.
    pub async fn handshake(&mut self, join: &JoinRequest, timeout: Duration) -> Result<Welcome> {
        info!("Starting handshake with server as {}", join.username);

        let handshake = ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            schema_hash: self.schema_hash,
            username: join.username.clone(),
            character_class: join.character_class.clone(),
        };
        self.send(handshake).await?;

        let response = tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| anyhow::anyhow!("Timed out waiting for handshake response"))??;

        match response {
            ServerMessage::HandshakeResponse {
                accepted: true,
                player_id,
                room_id,
                ..
            } => {
                let player_id = player_id.ok_or_else(|| {
                    anyhow::anyhow!("Server accepted but didn't assign a player ID")
                })?;
                info!("Handshake successful, assigned {}", player_id);
                Ok(Welcome { player_id, room_id })
            }
            ServerMessage::HandshakeResponse { reason, .. } => {
                let reason = reason.unwrap_or_else(|| "Unknown reason".to_string());
                Err(anyhow::anyhow!("Handshake rejected: {}", reason))
            }
            msg => Err(anyhow::anyhow!("Expected HandshakeResponse, got {:?}", msg)),
        }
    }

    /// Send a client message on the appropriate channel.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        send_client_message(&self.channel_manager, msg).await
    }

    /// Receive the next server message from any channel.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        match self.inbound.recv().await {
            Some(Inbound::Message(_, msg)) => Ok(msg),
            Some(Inbound::Closed(reason)) => Err(anyhow::anyhow!("Connection closed: {}", reason)),
            None => Err(anyhow::anyhow!("Connection closed")),
        }
    }

    /// Get the remote server address.
    pub fn remote_address(&self) -> SocketAddr {
        self.channel_manager.remote_address()
    }

    /// Split into the shared sender, the inbound queue and the pump task.
    pub fn into_parts(
        self,
    ) -> (
        Arc<ChannelManager>,
        mpsc::UnboundedReceiver<Inbound<ServerMessage>>,
        JoinHandle<()>,
    ) {
        (self.channel_manager, self.inbound, self.pump)
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        info!("Closing connection: {}", reason);
        self.channel_manager.close(reason);
    }
}

/// Encode and send a client message on the channel it belongs to.
pub async fn send_client_message(manager: &ChannelManager, msg: ClientMessage) -> Result<()> {
    let channel = select_client_channel(&msg);
    let data = encode_client_message(&msg)?;
    manager.send(channel, &data).await
}

/// Server-side connection wrapping QUIC transport and protocol handling.
pub struct ServerConnection {
    channel_manager: ChannelManager,
    inbound: mpsc::UnboundedReceiver<Inbound<ClientMessage>>,
    _pump: JoinHandle<()>,
    schema_hash: u64,
}

impl ServerConnection {
    /// Create a new server connection from a QUIC connection.
    pub fn new(connection: quinn::Connection) -> Self {
        let (inbound, pump) = spawn_inbound(connection.clone(), decode_client_message);
        Self {
            channel_manager: ChannelManager::new(connection),
            inbound,
            _pump: pump,
            schema_hash: compute_schema_hash(),
        }
    }

    /// Wait for and validate the client handshake.
    ///
    /// Rejections are sent to the client before the error is returned.
    pub async fn accept_handshake(&mut self) -> Result<JoinRequest> {
        info!(
            "Waiting for handshake from {}",
            self.channel_manager.remote_address()
        );

        match self.recv().await? {
            ClientMessage::Handshake {
                version,
                schema_hash,
                username,
                character_class,
            } => {
                debug!(
                    "Received handshake: version={}, schema_hash={:016x}",
                    version, schema_hash
                );

                if version != PROTOCOL_VERSION {
                    warn!(
                        "Protocol version mismatch: client={}, server={}",
                        version, PROTOCOL_VERSION
                    );
                    self.reject(&format!(
                        "Protocol version mismatch: server uses v{}",
                        PROTOCOL_VERSION
                    ))
                    .await?;
                    return Err(anyhow::anyhow!(
                        "Protocol version mismatch: {} != {}",
                        version,
                        PROTOCOL_VERSION
                    ));
                }

                if schema_hash != self.schema_hash {
                    warn!(
                        "Schema hash mismatch: client={:016x}, server={:016x}",
                        schema_hash, self.schema_hash
                    );
                    self.reject("Schema mismatch: incompatible client version")
                        .await?;
                    return Err(anyhow::anyhow!(
                        "Schema hash mismatch: {:016x} != {:016x}",
                        schema_hash,
                        self.schema_hash
                    ));
                }

                Ok(JoinRequest {
                    username,
                    character_class,
                })
            }
            msg => {
                warn!("Expected Handshake, got {:?}", msg);
                self.reject("Expected handshake message").await?;
                Err(anyhow::anyhow!("Expected Handshake, got {:?}", msg))
            }
        }
    }

    /// Confirm the handshake and assign the player's identity.
    pub async fn welcome(&self, player_id: PlayerId, room_id: Option<String>) -> Result<()> {
        self.send(ServerMessage::HandshakeResponse {
            accepted: true,
            reason: None,
            player_id: Some(player_id),
            room_id,
        })
        .await
    }

    /// Reject the handshake with a reason.
    pub async fn reject(&self, reason: &str) -> Result<()> {
        self.send(ServerMessage::HandshakeResponse {
            accepted: false,
            reason: Some(reason.to_string()),
            player_id: None,
            room_id: None,
        })
        .await
    }

    /// Send a server message on the appropriate channel.
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        let channel = select_server_channel(&msg);
        let data = encode_server_message(&msg)?;
        self.channel_manager.send(channel, &data).await
    }

    /// Receive the next client message from any channel.
    pub async fn recv(&mut self) -> Result<ClientMessage> {
        match self.inbound.recv().await {
            Some(Inbound::Message(_, msg)) => Ok(msg),
            Some(Inbound::Closed(reason)) => Err(anyhow::anyhow!("Connection closed: {}", reason)),
            None => Err(anyhow::anyhow!("Connection closed")),
        }
    }

    /// Get the remote client address.
    pub fn remote_address(&self) -> SocketAddr {
        self.channel_manager.remote_address()
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        info!("Closing connection: {}", reason);
        self.channel_manager.close(reason);
    }
}

/// Select the appropriate channel for a client message.
fn select_client_channel(msg: &ClientMessage) -> ChannelType {
    match msg {
        ClientMessage::Handshake { .. } => ChannelType::Control,
        ClientMessage::Batch(_) => ChannelType::Batch,
        ClientMessage::Attack { .. }
        | ClientMessage::EnemyHit { .. }
        | ClientMessage::AbilityUse { .. }
        | ClientMessage::PetEquip { .. }
        | ClientMessage::PetUnequip
        | ClientMessage::Respawn => ChannelType::Actions,
        ClientMessage::Disconnect { .. } => ChannelType::Control,
    }
}

/// Select the appropriate channel for a server message.
fn select_server_channel(msg: &ServerMessage) -> ChannelType {
    match msg {
        ServerMessage::HandshakeResponse { .. }
        | ServerMessage::Kicked { .. }
        | ServerMessage::ServerShutdown { .. }
        | ServerMessage::Disconnect { .. } => ChannelType::Control,
        ServerMessage::EntitySpawned(_)
        | ServerMessage::EntityMoved(_)
        | ServerMessage::EntitiesMoved(_)
        | ServerMessage::EntityStateChanged { .. }
        | ServerMessage::EntityDespawned { .. }
        | ServerMessage::PlayerRespawned { .. }
        | ServerMessage::PetEquipped { .. }
        | ServerMessage::PetUnequipped { .. }
        | ServerMessage::PetUpdated { .. } => ChannelType::World,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BatchEnvelope, EntityKind, EntitySpawn};
    use crate::transport::{ClientEndpoint, ServerEndpoint, TlsMode};
    use klyra_core::{EntityId, Vec2};

    fn join() -> JoinRequest {
        JoinRequest {
            username: "kelise".to_string(),
            character_class: "mage".to_string(),
        }
    }

    #[tokio::test]
    async fn test_handshake_success() {
        let server =
            ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).expect("Failed to bind server");
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let incoming = server.accept().await.expect("No incoming connection");
            let connection = incoming.await.expect("Failed to accept connection");
            let mut server_conn = ServerConnection::new(connection);

            let request = server_conn
                .accept_handshake()
                .await
                .expect("Failed to accept handshake");
            assert_eq!(request.username, "kelise");

            server_conn
                .welcome(PlayerId(42), Some("room-a".to_string()))
                .await
                .expect("Failed to send handshake response");

            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        });

        let client_endpoint =
            ClientEndpoint::new(TlsMode::Insecure).expect("Failed to create client");
        let connection = client_endpoint
            .connect(server_addr)
            .await
            .expect("Failed to connect");
        let mut client_conn = ClientConnection::new(connection);

        let welcome = client_conn
            .handshake(&join(), Duration::from_secs(5))
            .await
            .expect("Handshake failed");

        assert_eq!(welcome.player_id, PlayerId(42));
        assert_eq!(welcome.room_id.as_deref(), Some("room-a"));

        server_handle.await.expect("Server task panicked");
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let server =
            ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).expect("Failed to bind server");
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let incoming = server.accept().await.expect("No incoming connection");
            let connection = incoming.await.expect("Failed to accept connection");
            let mut server_conn = ServerConnection::new(connection);
            server_conn.accept_handshake().await.expect("handshake");
            server_conn.reject("Room is full").await.expect("reject");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        });

        let client_endpoint =
            ClientEndpoint::new(TlsMode::Insecure).expect("Failed to create client");
        let connection = client_endpoint.connect(server_addr).await.expect("connect");
        let mut client_conn = ClientConnection::new(connection);

        let err = client_conn
            .handshake(&join(), Duration::from_secs(5))
            .await
            .expect_err("handshake should be rejected");
        assert!(err.to_string().contains("Room is full"));

        server_handle.await.expect("Server task panicked");
    }

    #[tokio::test]
    async fn test_batch_and_world_roundtrip() {
        let server =
            ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).expect("Failed to bind server");
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let incoming = server.accept().await.expect("No incoming connection");
            let connection = incoming.await.expect("Failed to accept connection");
            let mut server_conn = ServerConnection::new(connection);

            server_conn.accept_handshake().await.expect("handshake");
            server_conn.welcome(PlayerId(7), None).await.expect("welcome");

            match server_conn.recv().await.expect("recv batch") {
                ClientMessage::Batch(envelope) => assert!(envelope.entries.is_empty()),
                other => panic!("expected batch, got {other:?}"),
            }

            server_conn
                .send(ServerMessage::EntitySpawned(EntitySpawn {
                    entity: EntityId(9),
                    kind: EntityKind::Creature,
                    position: Vec2::new(10.0, 20.0),
                    state: None,
                }))
                .await
                .expect("send spawn");

            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        });

        let client_endpoint = ClientEndpoint::new(TlsMode::Insecure).expect("create client");
        let connection = client_endpoint.connect(server_addr).await.expect("connect");
        let mut client_conn = ClientConnection::new(connection);

        let welcome = client_conn
            .handshake(&join(), Duration::from_secs(5))
            .await
            .expect("handshake");
        assert_eq!(welcome.player_id, PlayerId(7));

        client_conn
            .send(ClientMessage::Batch(BatchEnvelope::default()))
            .await
            .expect("send batch");

        match client_conn.recv().await.expect("recv spawn") {
            ServerMessage::EntitySpawned(spawn) => assert_eq!(spawn.entity, EntityId(9)),
            other => panic!("expected spawn, got {other:?}"),
        }

        server_handle.await.expect("server task");
    }
}
