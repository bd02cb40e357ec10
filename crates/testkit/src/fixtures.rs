//! Builders for server messages, so tests read as a script of server pushes.

use klyra_core::{EntityId, Facing, PlayerId, Timestamp, Vec2};
use klyra_net::{
    DespawnReason, EntityKind, EntityMove, EntitySpawn, Movement, PetSnapshot, RemoteState,
    ServerMessage, SessionEvent,
};

/// Another player's avatar appearing at `(x, y)`.
pub fn spawn_avatar(id: EntityId, x: f32, y: f32) -> ServerMessage {
    ServerMessage::EntitySpawned(EntitySpawn {
        entity: id,
        kind: EntityKind::Avatar,
        position: Vec2::new(x, y),
        state: Some(RemoteState::Idle),
    })
}

/// A creature appearing at `(x, y)`.
pub fn spawn_creature(id: EntityId, x: f32, y: f32) -> ServerMessage {
    ServerMessage::EntitySpawned(EntitySpawn {
        entity: id,
        kind: EntityKind::Creature,
        position: Vec2::new(x, y),
        state: Some(RemoteState::Idle),
    })
}

/// Absolute move of an already known entity.
pub fn move_to(id: EntityId, x: f32, y: f32) -> EntityMove {
    EntityMove {
        entity: id,
        kind: None,
        motion: Movement::Absolute {
            position: Vec2::new(x, y),
        },
        state: None,
        timestamp: Timestamp::now(),
    }
}

/// Relative move of an already known entity.
pub fn move_by(id: EntityId, dx: f32, dy: f32) -> EntityMove {
    EntityMove {
        entity: id,
        kind: None,
        motion: Movement::Delta {
            delta: Vec2::new(dx, dy),
        },
        state: None,
        timestamp: Timestamp::now(),
    }
}

/// Pushed state change.
pub fn state_change(id: EntityId, state: RemoteState) -> ServerMessage {
    ServerMessage::EntityStateChanged { entity: id, state }
}

/// Entity removal.
pub fn despawn(id: EntityId, reason: DespawnReason) -> ServerMessage {
    ServerMessage::EntityDespawned { entity: id, reason }
}

/// Another player's companion snapshot.
pub fn pet_update(owner: PlayerId, x: f32, y: f32, state: RemoteState) -> ServerMessage {
    ServerMessage::PetUpdated {
        owner,
        snapshot: PetSnapshot {
            position: Vec2::new(x, y),
            state,
            facing: Facing::Right,
            idle_variant: 1,
        },
    }
}

/// Wrap a server message the way the session delivers it.
pub fn pushed(message: ServerMessage) -> SessionEvent {
    SessionEvent::Server(message)
}
