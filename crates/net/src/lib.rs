#![warn(missing_docs)]
//! Client/server networking: QUIC transport, framed protocol, the session
//! channel wrapper and the outbound intent batcher.

mod batcher;
mod bus;
mod channel;
mod codec;
mod connection;
mod protocol;
mod session;
mod transport;

pub use batcher::{BatcherConfig, DeltaMovementState, FlushOutcome, OutboundBatcher};
pub use bus::{EventBus, EventKind, HandlerId, SessionEvent, Subscription};
pub use channel::{spawn_inbound, ChannelManager, ChannelReader, ChannelType, Inbound};
pub use codec::{
    compute_schema_hash, decode_client_message, decode_server_message, encode_client_message,
    encode_server_message, frame_body_len, FRAME_HEADER_LEN, MAX_FRAME_LEN,
};
pub use connection::{
    send_client_message, ClientConnection, JoinRequest, ServerConnection, Welcome,
};
pub use protocol::{
    BatchEntry, BatchEnvelope, ClientMessage, DespawnReason, EntityKind, EntityMove, EntitySpawn,
    IntentKind, IntentPayload, Movement, PetSnapshot, RemoteState, ServerMessage,
    PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
pub use session::{ConnectionError, ConnectionState, NetworkConfig, NetworkSession, Publish};
pub use transport::{ClientEndpoint, ServerEndpoint, TlsMode};
