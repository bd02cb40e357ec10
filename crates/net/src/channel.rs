//! Channel multiplexing for different message types over QUIC.
//!
//! Each logical channel is one long-lived unidirectional stream carrying codec
//! frames back to back. Delivery is reliable and ordered within a channel and
//! unordered across channels.

use crate::codec::{frame_body_len, FRAME_HEADER_LEN};
use anyhow::{Context, Result};
use quinn::{Connection, RecvStream, SendStream};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Channel type identifier for message routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    /// Handshake and session lifecycle.
    Control = 0,
    /// Batched client intents (`batch:update`).
    Batch = 1,
    /// Latency-critical one-shot client actions that bypass batching.
    Actions = 2,
    /// Server entity events (spawn, move, state, despawn).
    World = 3,
}

impl TryFrom<u8> for ChannelType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ChannelType::Control),
            1 => Ok(ChannelType::Batch),
            2 => Ok(ChannelType::Actions),
            3 => Ok(ChannelType::World),
            _ => Err(anyhow::anyhow!("Invalid channel type: {}", value)),
        }
    }
}

/// Multiplexed channel manager for QUIC connections.
pub struct ChannelManager {
    connection: Connection,
    streams: Mutex<HashMap<ChannelType, SendStream>>,
}

impl ChannelManager {
    /// Create a new channel manager for the given connection.
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Send one encoded frame on a channel, opening its stream on first use.
    pub async fn send(&self, channel: ChannelType, frame: &[u8]) -> Result<()> {
        let mut streams = self.streams.lock().await;

        let stream = match streams.entry(channel) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut stream = self
                    .connection
                    .open_uni()
                    .await
                    .context("Failed to open unidirectional stream")?;
                stream
                    .write_all(&[channel as u8])
                    .await
                    .context("Failed to write channel type")?;
                debug!("Opened {:?} channel", channel);
                entry.insert(stream)
            }
        };

        stream
            .write_all(frame)
            .await
            .context("Failed to write frame")?;

        trace!("Sent {} bytes on {:?}", frame.len(), channel);

        Ok(())
    }

    /// Accept the next channel opened by the peer.
    pub async fn accept(&self) -> Result<ChannelReader> {
        accept_channel(&self.connection).await
    }

    /// Get the remote address of this connection.
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Clone of the underlying connection handle.
    pub fn connection(&self) -> Connection {
        self.connection.clone()
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}

/// Receiving half of one logical channel.
pub struct ChannelReader {
    channel: ChannelType,
    stream: RecvStream,
}

impl ChannelReader {
    /// Channel this reader belongs to.
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    /// Read the next complete frame, or `None` once the peer finished the stream.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match self.stream.read_exact(&mut header).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
            Err(err) => return Err(err).context("Failed to read frame header"),
        }

        let body_len = frame_body_len(header)?;
        let mut frame = vec![0u8; FRAME_HEADER_LEN + body_len];
        frame[..FRAME_HEADER_LEN].copy_from_slice(&header);
        self.stream
            .read_exact(&mut frame[FRAME_HEADER_LEN..])
            .await
            .context("Failed to read frame body")?;

        trace!("Received {} bytes on {:?}", frame.len(), self.channel);

        Ok(Some(frame))
    }
}

async fn accept_channel(connection: &Connection) -> Result<ChannelReader> {
    let mut stream = connection
        .accept_uni()
        .await
        .context("Failed to accept unidirectional stream")?;

    let mut channel_byte = [0u8; 1];
    stream
        .read_exact(&mut channel_byte)
        .await
        .context("Failed to read channel type")?;
    let channel = ChannelType::try_from(channel_byte[0])?;

    Ok(ChannelReader { channel, stream })
}

/// Item produced by an inbound pump.
#[derive(Debug)]
pub enum Inbound<M> {
    /// A decoded message and the channel it arrived on.
    Message(ChannelType, M),
    /// The connection is gone; no further items follow.
    Closed(String),
}

/// Spawn the tasks that read every peer channel and forward decoded messages.
///
/// Frames that fail to decode are logged and skipped; one corrupt frame never
/// tears down the connection.
pub fn spawn_inbound<M, F>(
    connection: Connection,
    decode: F,
) -> (mpsc::UnboundedReceiver<Inbound<M>>, JoinHandle<()>)
where
    M: Send + 'static,
    F: Fn(&[u8]) -> Result<M> + Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut readers = tokio::task::JoinSet::new();
        let reason = loop {
            match accept_channel(&connection).await {
                Ok(mut reader) => {
                    let tx = tx.clone();
                    let decode = decode.clone();
                    readers.spawn(async move {
                        let channel = reader.channel();
                        loop {
                            match reader.next_frame().await {
                                Ok(Some(frame)) => match decode(&frame) {
                                    Ok(msg) => {
                                        if tx.send(Inbound::Message(channel, msg)).is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        warn!("Dropping malformed frame on {:?}: {:#}", channel, err)
                                    }
                                },
                                Ok(None) => {
                                    debug!("{:?} channel finished", channel);
                                    break;
                                }
                                Err(err) => {
                                    debug!("{:?} channel closed: {:#}", channel, err);
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(err) => break format!("{:#}", err),
            }
        };

        // Let in-flight readers drain what already arrived before reporting closure.
        while readers.join_next().await.is_some() {}
        let _ = tx.send(Inbound::Closed(reason));
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ClientEndpoint, ServerEndpoint, TlsMode};

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn test_channel_keeps_frame_order() {
        let server =
            ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).expect("Failed to bind server");
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let incoming = server.accept().await.expect("No incoming connection");
            let connection = incoming.await.expect("Failed to accept connection");
            let manager = ChannelManager::new(connection);

            let mut reader = manager.accept().await.expect("accept channel");
            assert_eq!(reader.channel(), ChannelType::Batch);

            let mut bodies = Vec::new();
            for _ in 0..3 {
                let frame = reader.next_frame().await.expect("read").expect("frame");
                bodies.push(frame[FRAME_HEADER_LEN..].to_vec());
            }
            assert_eq!(bodies, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
        });

        let client = ClientEndpoint::new(TlsMode::Insecure).expect("Failed to create client");
        let connection = client.connect(server_addr).await.expect("Failed to connect");
        let manager = ChannelManager::new(connection);

        for body in [b"A", b"B", b"C"] {
            manager
                .send(ChannelType::Batch, &frame(body))
                .await
                .expect("Failed to send");
        }

        server_handle.await.expect("Server task panicked");
    }

    #[tokio::test]
    async fn test_inbound_pump_reports_close() {
        let server =
            ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).expect("Failed to bind server");
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let incoming = server.accept().await.expect("No incoming connection");
            let connection = incoming.await.expect("Failed to accept connection");
            let manager = ChannelManager::new(connection);
            manager
                .send(ChannelType::World, &frame(b"hello"))
                .await
                .expect("send");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            manager.close("done");
        });

        let client = ClientEndpoint::new(TlsMode::Insecure).expect("Failed to create client");
        let connection = client.connect(server_addr).await.expect("Failed to connect");
        let (mut rx, _pump) = spawn_inbound(connection, |frame: &[u8]| Ok(frame.len()));

        match rx.recv().await.expect("first item") {
            Inbound::Message(channel, len) => {
                assert_eq!(channel, ChannelType::World);
                assert_eq!(len, FRAME_HEADER_LEN + 5);
            }
            Inbound::Closed(reason) => panic!("closed early: {reason}"),
        }
        assert!(matches!(rx.recv().await, Some(Inbound::Closed(_))));

        server_handle.await.expect("Server task panicked");
    }
}
