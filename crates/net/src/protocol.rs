//! Wire protocol shared by the client and server.
//!
//! Every message is serialized with postcard and framed by [`crate::codec`].

use klyra_core::{EntityId, Facing, PlayerId, Timestamp, Vec2};
use serde::{Deserialize, Serialize};

/// Protocol version; bump on any incompatible message change.
pub const PROTOCOL_VERSION: u16 = 1;

/// Magic bytes mixed into the schema hash.
pub const PROTOCOL_MAGIC: &[u8; 4] = b"KLYR";

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Initial handshake carrying the player's join request.
    Handshake {
        /// Client protocol version.
        version: u16,
        /// Schema hash of the client build.
        schema_hash: u64,
        /// Display name.
        username: String,
        /// Selected character class.
        character_class: String,
    },
    /// Batched state-change intents (`batch:update`).
    Batch(BatchEnvelope),
    /// Immediate melee attack.
    Attack {
        /// Targeted entity, if any.
        target: Option<EntityId>,
        /// Damage dealt.
        damage: u32,
    },
    /// Immediate hit report against a creature.
    EnemyHit {
        /// Creature that was hit.
        enemy: EntityId,
        /// Damage dealt.
        damage: u32,
    },
    /// Immediate ability cast.
    AbilityUse {
        /// Ability key (e.g. `"q"`, `"autoattack"`).
        ability: String,
        /// Optional target of the ability.
        target: Option<EntityId>,
    },
    /// Local player equipped a companion.
    PetEquip {
        /// Companion kind identifier.
        kind: String,
    },
    /// Local player unequipped their companion.
    PetUnequip,
    /// Request to respawn after death.
    Respawn,
    /// Graceful disconnect notice.
    Disconnect {
        /// Reason for disconnecting.
        reason: String,
    },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Response to the client handshake.
    HandshakeResponse {
        /// Whether the join was accepted.
        accepted: bool,
        /// Rejection reason, when not accepted.
        reason: Option<String>,
        /// Identity assigned to the player.
        player_id: Option<PlayerId>,
        /// Room the player was placed in.
        room_id: Option<String>,
    },
    /// An entity entered the client's view (join or spawn).
    EntitySpawned(EntitySpawn),
    /// A single entity moved.
    EntityMoved(EntityMove),
    /// Several entities moved during one server tick.
    EntitiesMoved(Vec<EntityMove>),
    /// Discrete behavior state changed without a position change.
    EntityStateChanged {
        /// Entity whose state changed.
        entity: EntityId,
        /// New state.
        state: RemoteState,
    },
    /// An entity left the client's view.
    EntityDespawned {
        /// Entity being removed.
        entity: EntityId,
        /// Why it was removed.
        reason: DespawnReason,
    },
    /// A player respawned at a new authoritative position.
    PlayerRespawned {
        /// Player that respawned.
        player: PlayerId,
        /// Respawn position.
        position: Vec2,
    },
    /// A player equipped a companion.
    PetEquipped {
        /// Owner of the companion.
        owner: PlayerId,
        /// Companion kind identifier.
        kind: String,
    },
    /// A player unequipped their companion.
    PetUnequipped {
        /// Owner of the companion.
        owner: PlayerId,
    },
    /// Position/state sync of another player's companion.
    PetUpdated {
        /// Owner of the companion.
        owner: PlayerId,
        /// Companion snapshot.
        snapshot: PetSnapshot,
    },
    /// The player was kicked.
    Kicked {
        /// Reason given by the server.
        reason: String,
    },
    /// The server is shutting down.
    ServerShutdown {
        /// Shutdown notice.
        message: String,
    },
    /// Server-initiated disconnect notice.
    Disconnect {
        /// Reason for disconnecting.
        reason: String,
    },
}

/// Kind of remote-controlled entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Another player's avatar.
    Avatar,
    /// Hostile creature.
    Creature,
}

/// Entity spawn/join payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawn {
    /// Spawned entity.
    pub entity: EntityId,
    /// What kind of entity it is.
    pub kind: EntityKind,
    /// Initial position.
    pub position: Vec2,
    /// Initial behavior state, if known.
    pub state: Option<RemoteState>,
}

/// Entity movement payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMove {
    /// Moving entity.
    pub entity: EntityId,
    /// Entity kind, which lets the client create records on first sight.
    pub kind: Option<EntityKind>,
    /// New position.
    pub motion: Movement,
    /// Optional behavior state carried with the move.
    pub state: Option<RemoteState>,
    /// Server send time.
    pub timestamp: Timestamp,
}

/// Position carried by a movement message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Movement {
    /// Absolute position.
    Absolute {
        /// New position.
        position: Vec2,
    },
    /// Displacement from the previous position.
    Delta {
        /// Displacement.
        delta: Vec2,
    },
}

impl Movement {
    /// Apply this movement to `origin`.
    pub fn apply(&self, origin: Vec2) -> Vec2 {
        match *self {
            Movement::Absolute { position } => position,
            Movement::Delta { delta } => origin + delta,
        }
    }
}

/// Union of behavior states any entity kind pushes over the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteState {
    /// Standing still.
    Idle,
    /// Moving or running.
    Moving,
    /// Companion following its owner.
    Following,
    /// Attack one-shot.
    Attacking,
    /// Damage reaction one-shot.
    Hurt,
    /// Companion play one-shot.
    Playing,
    /// Companion sleeping.
    Sleeping,
    /// Companion chasing a collectible.
    Collecting,
    /// Playing its death animation.
    Dying,
}

/// Why an entity was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DespawnReason {
    /// Player left the session.
    Left,
    /// Entity left view or was despawned by the spawn system.
    Despawned,
    /// Entity died.
    Died,
}

/// Companion state mirrored to other players.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PetSnapshot {
    /// Rounded companion position.
    pub position: Vec2,
    /// Behavior state.
    pub state: RemoteState,
    /// Sprite facing.
    pub facing: Facing,
    /// Which idle animation variant is showing (1 or 2).
    pub idle_variant: u8,
}

/// Ordered batch of intents flushed in one network write.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchEnvelope {
    /// Entries in insertion order.
    pub entries: Vec<BatchEntry>,
}

/// One queued intent inside a [`BatchEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Intent kind (`type` on the wire).
    pub kind: IntentKind,
    /// Intent payload.
    pub data: IntentPayload,
    /// When the intent was queued.
    pub timestamp: Timestamp,
}

/// Kinds of batched intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    /// Local player movement.
    Move,
    /// Attack intent that tolerates batching latency.
    Attack,
    /// Ability cast that tolerates batching latency.
    AbilityUse,
    /// Companion position/state sync.
    PetSync,
}

/// Payload of a batched intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntentPayload {
    /// Movement, absolute or delta-compressed.
    Move(Movement),
    /// Companion snapshot.
    PetSync(PetSnapshot),
    /// Caller-encoded payload the core does not interpret.
    Opaque(Vec<u8>),
}
