//! Multiplayer session glue: one owned network session, the outbound batcher
//! on its flush timer, and the per-kind reconcilers fed by inbound events.

use crate::avatar::AvatarState;
use crate::companion::{Collectible, CompanionConfig, CompanionSim, PetState, PET_KINDS};
use crate::creature::CreatureState;
use crate::motion::MotionProfile;
use crate::reconciler::Reconciler;
use klyra_core::{EntityId, PlayerId, Timestamp, Vec2};
use klyra_net::{
    BatcherConfig, ClientMessage, ConnectionError, DespawnReason, EntityKind, EntityMove,
    EntitySpawn, FlushOutcome, IntentKind, IntentPayload, Movement, NetworkConfig, NetworkSession,
    OutboundBatcher, Publish, RemoteState, ServerMessage, SessionEvent, Welcome,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Motion profiles per entity kind, read from the `[reconciler]` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Other players' avatars.
    pub avatar: MotionProfile,
    /// Hostile creatures.
    pub creature: MotionProfile,
    /// Other players' companions.
    pub pet: MotionProfile,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            avatar: MotionProfile::AVATAR,
            creature: MotionProfile::CREATURE,
            pet: MotionProfile::REMOTE_PET,
        }
    }
}

/// Everything [`SyncClient`] needs besides the network address.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Outbound batching.
    pub batcher: BatcherConfig,
    /// Remote entity motion.
    pub reconciler: ReconcilerConfig,
    /// Local companion.
    pub companion: CompanionConfig,
}

/// Session lifecycle notices surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The server removed this client.
    Kicked(String),
    /// The server is going away.
    Shutdown(String),
    /// The server closed the session.
    ServerDisconnect(String),
    /// The transport was lost.
    Disconnected(String),
}

/// Multiplayer client state-sync core.
pub struct SyncClient {
    session: NetworkSession,
    batcher: OutboundBatcher,
    flush_timer: Option<Interval>,
    avatars: Reconciler<AvatarState>,
    creatures: Reconciler<CreatureState>,
    pets: Reconciler<PetState>,
    companion: Option<CompanionSim>,
    companion_config: CompanionConfig,
    local_id: Option<EntityId>,
    local_position: Option<Vec2>,
}

impl SyncClient {
    /// Create a disconnected client.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            session: NetworkSession::new(),
            batcher: OutboundBatcher::new(config.batcher),
            flush_timer: None,
            avatars: Reconciler::new("avatar", config.reconciler.avatar),
            creatures: Reconciler::new("creature", config.reconciler.creature),
            pets: Reconciler::new("pet", config.reconciler.pet),
            companion: None,
            companion_config: config.companion,
            local_id: None,
            local_position: None,
        }
    }

    /// Connect, join, and start the flush timer.
    pub async fn connect(&mut self, network: &NetworkConfig) -> Result<Welcome, ConnectionError> {
        let welcome = self.session.connect(network).await?;

        self.local_id = Some(welcome.player_id.into());
        self.batcher.reset_movement();

        let mut timer = interval(self.batcher.flush_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.flush_timer = Some(timer);

        Ok(welcome)
    }

    /// Wait for the next flush tick or inbound event and process it.
    ///
    /// Returns the lifecycle notice the event raised, if any. Returns `None`
    /// immediately when the client was never connected or was shut down.
    pub async fn step(&mut self) -> Option<SessionNotice> {
        let connected = self.session.is_connected();
        let timer = self.flush_timer.as_mut()?;

        let event = tokio::select! {
            _ = timer.tick() => None,
            event = self.session.next_event(), if connected => Some(event),
        };

        match event {
            None => {
                self.flush();
                None
            }
            Some(event) => self.handle_event(&event?),
        }
    }

    /// Apply every inbound event that already arrived, without waiting.
    ///
    /// Returns the first lifecycle notice raised, if any. Events after it are
    /// still applied.
    pub fn pump(&mut self) -> Option<SessionNotice> {
        let mut notice = None;
        for event in self.session.poll_events() {
            let raised = self.handle_event(&event);
            notice = notice.or(raised);
        }
        notice
    }

    /// Send the outbound queue now if the channel is up.
    pub fn flush(&mut self) -> FlushOutcome {
        self.batcher.flush(&self.session)
    }

    /// Send the outbound queue through `channel` instead of the session.
    pub fn flush_to(&mut self, channel: &impl Publish) -> FlushOutcome {
        self.batcher.flush(channel)
    }

    /// Apply one inbound event to the reconcilers.
    pub fn handle_event(&mut self, event: &SessionEvent) -> Option<SessionNotice> {
        let now = Timestamp::now();
        match event {
            SessionEvent::Disconnected { reason } => {
                warn!("Connection lost ({}); freezing remote entities", reason);
                self.avatars.freeze();
                self.creatures.freeze();
                self.pets.freeze();
                Some(SessionNotice::Disconnected(reason.clone()))
            }
            SessionEvent::Server(message) => self.handle_server_message(message, now),
        }
    }

    fn handle_server_message(
        &mut self,
        message: &ServerMessage,
        now: Timestamp,
    ) -> Option<SessionNotice> {
        match message {
            ServerMessage::HandshakeResponse { .. } => {
                debug!("Ignoring late handshake response");
            }
            ServerMessage::EntitySpawned(spawn) => self.on_spawn(spawn, now),
            ServerMessage::EntityMoved(movement) => self.on_move(movement, now),
            ServerMessage::EntitiesMoved(moves) => {
                for movement in moves {
                    self.on_move(movement, now);
                }
            }
            ServerMessage::EntityStateChanged { entity, state } => {
                self.on_state(*entity, *state, now);
            }
            ServerMessage::EntityDespawned { entity, reason } => {
                self.on_despawn(*entity, *reason);
            }
            ServerMessage::PlayerRespawned { player, position } => {
                self.on_respawn(*player, *position, now);
            }
            ServerMessage::PetEquipped { owner, kind } => {
                let owner = EntityId::from(*owner);
                if self.is_local(owner) {
                    return None;
                }
                match self.avatars.get(owner).map(|avatar| avatar.visual()) {
                    Some(at) => {
                        debug!("{} equipped {}", owner, kind);
                        let offset = Vec2::new(self.companion_config.orbit_radius, 0.0);
                        self.pets.on_spawn(owner, at + offset, PetState::Idle, now);
                    }
                    None => debug!("Pet equip for unknown owner {} ignored", owner),
                }
            }
            ServerMessage::PetUnequipped { owner } => {
                let owner = EntityId::from(*owner);
                if !self.is_local(owner) {
                    self.pets.on_despawn(owner);
                }
            }
            ServerMessage::PetUpdated { owner, snapshot } => {
                let owner = EntityId::from(*owner);
                if self.is_local(owner) {
                    return None;
                }
                let state = PetState::from_remote(snapshot.state);
                let applied = if self.pets.contains(owner) {
                    self.pets.on_remote_update(
                        owner,
                        Movement::Absolute {
                            position: snapshot.position,
                        },
                        state,
                        now,
                    )
                } else if self.avatars.contains(owner) {
                    self.pets.on_spawn(
                        owner,
                        snapshot.position,
                        state.unwrap_or(PetState::Idle),
                        now,
                    )
                } else {
                    debug!("Pet update for unknown owner {} ignored", owner);
                    false
                };
                if !applied {
                    return None;
                }
                self.pets.set_facing(owner, snapshot.facing);
                self.pets.set_variant(owner, snapshot.idle_variant);
            }
            ServerMessage::Kicked { reason } => {
                return Some(SessionNotice::Kicked(reason.clone()));
            }
            ServerMessage::ServerShutdown { message } => {
                return Some(SessionNotice::Shutdown(message.clone()));
            }
            ServerMessage::Disconnect { reason } => {
                return Some(SessionNotice::ServerDisconnect(reason.clone()));
            }
        }
        None
    }

    fn on_spawn(&mut self, spawn: &EntitySpawn, now: Timestamp) {
        if self.is_local(spawn.entity) {
            return;
        }
        match spawn.kind {
            EntityKind::Avatar => {
                let state = spawn
                    .state
                    .and_then(AvatarState::from_remote)
                    .unwrap_or(AvatarState::Idle);
                self.avatars.on_spawn(spawn.entity, spawn.position, state, now);
            }
            EntityKind::Creature => {
                let state = spawn
                    .state
                    .and_then(CreatureState::from_remote)
                    .unwrap_or(CreatureState::Idle);
                self.creatures
                    .on_spawn(spawn.entity, spawn.position, state, now);
            }
        }
    }

    fn on_move(&mut self, movement: &EntityMove, now: Timestamp) {
        let id = movement.entity;
        if self.is_local(id) {
            return;
        }

        if self.avatars.contains(id) {
            let state = movement.state.and_then(AvatarState::from_remote);
            self.avatars.on_remote_update(id, movement.motion, state, now);
            return;
        }
        if self.creatures.contains(id) {
            let state = movement.state.and_then(CreatureState::from_remote);
            self.creatures
                .on_remote_update(id, movement.motion, state, now);
            return;
        }

        // First sighting through a move: only an absolute position with a
        // known kind is enough to place the entity.
        match (movement.kind, movement.motion) {
            (Some(kind), Movement::Absolute { position }) => self.on_spawn(
                &EntitySpawn {
                    entity: id,
                    kind,
                    position,
                    state: movement.state,
                },
                now,
            ),
            _ => debug!("Move for unknown {} ignored", id),
        }
    }

    fn on_state(&mut self, id: EntityId, state: RemoteState, now: Timestamp) {
        if self.is_local(id) {
            return;
        }
        if self.avatars.contains(id) {
            match AvatarState::from_remote(state) {
                Some(state) => {
                    self.avatars.on_state(id, state, now);
                }
                None => debug!("Avatar {} cannot be {:?}", id, state),
            }
        } else if self.creatures.contains(id) {
            match CreatureState::from_remote(state) {
                Some(state) => {
                    self.creatures.on_state(id, state, now);
                }
                None => debug!("Creature {} cannot be {:?}", id, state),
            }
        } else {
            debug!("State for unknown {} ignored", id);
        }
    }

    fn on_despawn(&mut self, id: EntityId, reason: DespawnReason) {
        if self.avatars.on_despawn(id).is_some() {
            info!("Player {} left ({:?})", id, reason);
            self.pets.on_despawn(id);
        } else {
            self.creatures.on_despawn(id);
        }
    }

    fn on_respawn(&mut self, player: PlayerId, position: Vec2, now: Timestamp) {
        let id = EntityId::from(player);
        if !position.is_finite() {
            warn!("Respawn of {} at non-finite {} ignored", id, position);
            return;
        }
        if self.is_local(id) {
            info!("Respawned at {}", position);
            self.batcher.reset_movement();
            self.local_position = Some(position);
            if let Some(companion) = self.companion.as_mut() {
                companion.teleport(position);
            }
            return;
        }

        if self.avatars.teleport(id, position, now) {
            self.avatars.on_state(id, AvatarState::Idle, now);
            let offset = Vec2::new(self.companion_config.orbit_radius, 0.0);
            self.pets.teleport(id, position + offset, now);
        }
    }

    /// Advance every remote entity and the local companion by one render tick.
    ///
    /// Returns the collectibles the companion picked up.
    pub fn frame(&mut self, dt: Duration, collectibles: &[Collectible]) -> Vec<u64> {
        self.avatars.tick(dt);
        self.creatures.tick(dt);
        self.pets.tick(dt);

        let mut collected = Vec::new();
        if let (Some(companion), Some(owner)) = (self.companion.as_mut(), self.local_position) {
            if let Some(id) = companion.update(dt, owner, collectibles) {
                collected.push(id);
            }
            if let Some(snapshot) = companion.sync_snapshot() {
                self.batcher
                    .queue_update(IntentKind::PetSync, IntentPayload::PetSync(snapshot));
            }
        }
        collected
    }

    /// Report the local player's position; delta-compressed into the batch.
    pub fn send_movement(&mut self, position: Vec2) -> Option<Movement> {
        self.local_position = Some(position);
        self.batcher.send_movement(position)
    }

    /// Queue an arbitrary intent for the next flush.
    pub fn queue_update(&mut self, kind: IntentKind, data: IntentPayload) {
        self.batcher.queue_update(kind, data);
    }

    /// Attack immediately, bypassing the batch.
    pub fn attack(&self, target: Option<EntityId>, damage: u32) {
        self.session.publish(ClientMessage::Attack { target, damage });
    }

    /// Report a hit on a creature immediately.
    pub fn hit_enemy(&self, enemy: EntityId, damage: u32) {
        self.session
            .publish(ClientMessage::EnemyHit { enemy, damage });
    }

    /// Cast an ability immediately.
    pub fn use_ability(&self, ability: impl Into<String>, target: Option<EntityId>) {
        self.session.publish(ClientMessage::AbilityUse {
            ability: ability.into(),
            target,
        });
    }

    /// Ask the server to respawn the local player.
    pub fn request_respawn(&self) {
        self.session.publish(ClientMessage::Respawn);
    }

    /// Equip a companion beside the local player and announce it.
    ///
    /// Returns false, leaving any current companion in place, if `kind` is
    /// not one of [`PET_KINDS`].
    pub fn equip_pet(&mut self, kind: &str) -> bool {
        if !PET_KINDS.contains(&kind) {
            warn!("Unknown pet kind {:?}; not equipped", kind);
            return false;
        }
        let owner = self.local_position.unwrap_or(Vec2::ZERO);
        self.companion = Some(CompanionSim::new(
            kind,
            owner,
            self.companion_config.clone(),
            rand::random(),
        ));
        self.session.publish(ClientMessage::PetEquip {
            kind: kind.to_string(),
        });
        true
    }

    /// Drop the local companion and announce it.
    pub fn unequip_pet(&mut self) {
        if self.companion.take().is_some() {
            self.session.publish(ClientMessage::PetUnequip);
        }
    }

    /// Cancel the flush timer, close the session and drop all entity state.
    pub async fn shutdown(&mut self) {
        self.flush_timer = None;
        self.session.disconnect("client shutdown").await;
        self.batcher.clear();
        self.avatars.clear();
        self.creatures.clear();
        self.pets.clear();
        self.companion = None;
        self.local_id = None;
        self.local_position = None;
        info!("Sync client shut down");
    }

    fn is_local(&self, id: EntityId) -> bool {
        self.local_id == Some(id)
    }

    /// The owned network session, for subscriptions.
    pub fn session_mut(&mut self) -> &mut NetworkSession {
        &mut self.session
    }

    /// True while the session is connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// The local player's entity id, once joined.
    pub fn local_id(&self) -> Option<EntityId> {
        self.local_id
    }

    /// Last reported local position.
    pub fn local_position(&self) -> Option<Vec2> {
        self.local_position
    }

    /// Outbound batcher.
    pub fn batcher(&self) -> &OutboundBatcher {
        &self.batcher
    }

    /// Other players' avatars.
    pub fn avatars(&self) -> &Reconciler<AvatarState> {
        &self.avatars
    }

    /// Hostile creatures.
    pub fn creatures(&self) -> &Reconciler<CreatureState> {
        &self.creatures
    }

    /// Other players' companions, keyed by owner.
    pub fn pets(&self) -> &Reconciler<PetState> {
        &self.pets
    }

    /// The local companion, if one is equipped.
    pub fn companion(&self) -> Option<&CompanionSim> {
        self.companion.as_ref()
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}
