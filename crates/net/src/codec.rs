//! Message encoding and decoding with framing.
//!
//! Frames are self-delimiting so several of them can share one QUIC stream.

use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_MAGIC, PROTOCOL_VERSION};
use anyhow::{Context, Result};
use blake3::Hash;

/// Size of the length prefix at the start of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on a single frame body; anything larger is treated as corrupt.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Compute schema hash from protocol definitions.
///
/// This hash is used to ensure client and server have compatible protocol versions.
pub fn compute_schema_hash() -> u64 {
    let mut hasher = blake3::Hasher::new();

    hasher.update(&PROTOCOL_VERSION.to_le_bytes());
    hasher.update(PROTOCOL_MAGIC);

    // Message type names (deterministic)
    hasher.update(b"ClientMessage");
    hasher.update(b"ServerMessage");
    hasher.update(b"BatchEnvelope");
    hasher.update(b"EntityMove");
    hasher.update(b"PetSnapshot");

    let hash: Hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(prefix)
}

/// Encode a client message with length prefix.
///
/// Frame format: [length: u32][message_type: u8][payload: bytes]
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(msg).context("Failed to serialize client message")?;
    Ok(build_frame(client_message_tag(msg), &payload))
}

/// Encode a server message with length prefix.
///
/// Frame format: [length: u32][message_type: u8][payload: bytes]
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(msg).context("Failed to serialize server message")?;
    Ok(build_frame(server_message_tag(msg), &payload))
}

/// Decode a client message from frame data.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage> {
    let payload = frame_payload(data)?;
    postcard::from_bytes(payload).context("Failed to deserialize client message")
}

/// Decode a server message from frame data.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage> {
    let payload = frame_payload(data)?;
    postcard::from_bytes(payload).context("Failed to deserialize server message")
}

/// Read the body length announced by a frame header.
pub fn frame_body_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize> {
    let length = u32::from_le_bytes(header) as usize;
    if length == 0 {
        return Err(anyhow::anyhow!("Empty frame body"));
    }
    if length > MAX_FRAME_LEN {
        return Err(anyhow::anyhow!(
            "Frame body of {} bytes exceeds limit of {}",
            length,
            MAX_FRAME_LEN
        ));
    }
    Ok(length)
}

fn build_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + 1 + payload.len());

    // Length (excluding length field itself)
    let length = (1 + payload.len()) as u32;
    frame.extend_from_slice(&length.to_le_bytes());
    frame.push(tag);
    frame.extend_from_slice(payload);

    frame
}

fn frame_payload(data: &[u8]) -> Result<&[u8]> {
    if data.len() < FRAME_HEADER_LEN + 1 {
        return Err(anyhow::anyhow!(
            "Frame too short: {} bytes (minimum 5)",
            data.len()
        ));
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length == 0 || data.len() < FRAME_HEADER_LEN + length {
        return Err(anyhow::anyhow!(
            "Incomplete frame: expected {} bytes, got {}",
            FRAME_HEADER_LEN + length,
            data.len()
        ));
    }

    // Skip message type tag
    Ok(&data[FRAME_HEADER_LEN + 1..FRAME_HEADER_LEN + length])
}

fn client_message_tag(msg: &ClientMessage) -> u8 {
    match msg {
        ClientMessage::Handshake { .. } => 0,
        ClientMessage::Batch(_) => 1,
        ClientMessage::Attack { .. } => 2,
        ClientMessage::EnemyHit { .. } => 3,
        ClientMessage::AbilityUse { .. } => 4,
        ClientMessage::PetEquip { .. } => 5,
        ClientMessage::PetUnequip => 6,
        ClientMessage::Respawn => 7,
        ClientMessage::Disconnect { .. } => 8,
    }
}

fn server_message_tag(msg: &ServerMessage) -> u8 {
    match msg {
        ServerMessage::HandshakeResponse { .. } => 0,
        ServerMessage::EntitySpawned(_) => 1,
        ServerMessage::EntityMoved(_) => 2,
        ServerMessage::EntitiesMoved(_) => 3,
        ServerMessage::EntityStateChanged { .. } => 4,
        ServerMessage::EntityDespawned { .. } => 5,
        ServerMessage::PlayerRespawned { .. } => 6,
        ServerMessage::PetEquipped { .. } => 7,
        ServerMessage::PetUnequipped { .. } => 8,
        ServerMessage::PetUpdated { .. } => 9,
        ServerMessage::Kicked { .. } => 10,
        ServerMessage::ServerShutdown { .. } => 11,
        ServerMessage::Disconnect { .. } => 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BatchEntry, BatchEnvelope, IntentKind, IntentPayload, Movement};
    use klyra_core::{PlayerId, Timestamp, Vec2};

    #[test]
    fn test_schema_hash_deterministic() {
        assert_eq!(compute_schema_hash(), compute_schema_hash());
        assert_ne!(compute_schema_hash(), 0);
    }

    #[test]
    fn test_encode_decode_client_handshake() {
        let msg = ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            schema_hash: 0xDEADBEEF,
            username: "aldric".to_string(),
            character_class: "warrior".to_string(),
        };

        let encoded = encode_client_message(&msg).expect("Failed to encode");
        let decoded = decode_client_message(&encoded).expect("Failed to decode");

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_encode_decode_server_handshake() {
        let msg = ServerMessage::HandshakeResponse {
            accepted: true,
            reason: None,
            player_id: Some(PlayerId(42)),
            room_id: Some("lobby-1".to_string()),
        };

        let encoded = encode_server_message(&msg).expect("Failed to encode");
        let decoded = decode_server_message(&encoded).expect("Failed to decode");

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_batch_keeps_entry_order() {
        let entries = (0..3)
            .map(|i| BatchEntry {
                kind: IntentKind::Move,
                data: IntentPayload::Move(Movement::Delta {
                    delta: Vec2::new(i as f32, 0.0),
                }),
                timestamp: Timestamp(1000 + i),
            })
            .collect();
        let msg = ClientMessage::Batch(BatchEnvelope { entries });

        let encoded = encode_client_message(&msg).expect("Failed to encode");
        match decode_client_message(&encoded).expect("Failed to decode") {
            ClientMessage::Batch(envelope) => {
                let stamps: Vec<u64> = envelope.entries.iter().map(|e| e.timestamp.0).collect();
                assert_eq!(stamps, vec![1000, 1001, 1002]);
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn test_frame_length_matches_header() {
        let encoded = encode_client_message(&ClientMessage::Respawn).expect("encode");
        let header = [encoded[0], encoded[1], encoded[2], encoded[3]];
        let body = frame_body_len(header).expect("valid header");
        assert_eq!(FRAME_HEADER_LEN + body, encoded.len());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        assert!(frame_body_len(header).is_err());
        assert!(frame_body_len([0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let data = vec![10, 0, 0, 0];
        assert!(decode_client_message(&data).is_err());
    }

    #[test]
    fn test_decode_too_short() {
        let data = vec![1, 2, 3];
        assert!(decode_server_message(&data).is_err());
    }
}
