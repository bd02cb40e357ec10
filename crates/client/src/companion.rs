//! Companion pets.
//!
//! The local player's companion runs a full behavior simulation here and
//! pushes throttled snapshots to the server. Other players' companions reuse
//! [`PetState`] through a [`Reconciler`](crate::Reconciler) fed by those
//! snapshots, with no owner cues, so they only follow what is pushed.

use crate::behavior::{BehaviorState, BehaviorStateMachine};
use crate::motion::{step_toward, MotionProfile, MotionSample};
use crate::reconciler::EntityView;
use klyra_core::{EntityId, Facing, Vec2};
use klyra_net::{PetSnapshot, RemoteState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::time::Duration;
use tracing::{debug, trace};

/// Distance to the orbit slot at which a following pet settles down.
const ARRIVE_DISTANCE: f32 = 5.0;

/// Pet kinds that have animations.
pub const PET_KINDS: &[&str] = &["red_panda"];

/// Behavior of a companion pet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PetState {
    /// Trailing a moving owner.
    Following,
    /// Sitting near the owner, alternating two idle animations.
    Idle,
    /// Play animation, once.
    Playing,
    /// Owner has been still for a while.
    Sleeping,
    /// Running to a collectible near the owner.
    Collecting,
}

impl PetState {
    /// Map a pushed state; `None` for states pets never take.
    pub fn from_remote(state: RemoteState) -> Option<Self> {
        match state {
            RemoteState::Following | RemoteState::Moving => Some(PetState::Following),
            RemoteState::Idle => Some(PetState::Idle),
            RemoteState::Playing => Some(PetState::Playing),
            RemoteState::Sleeping => Some(PetState::Sleeping),
            RemoteState::Collecting => Some(PetState::Collecting),
            RemoteState::Attacking | RemoteState::Hurt | RemoteState::Dying => None,
        }
    }

    /// State as pushed to other players.
    pub fn to_remote(self) -> RemoteState {
        match self {
            PetState::Following => RemoteState::Following,
            PetState::Idle => RemoteState::Idle,
            PetState::Playing => RemoteState::Playing,
            PetState::Sleeping => RemoteState::Sleeping,
            PetState::Collecting => RemoteState::Collecting,
        }
    }
}

/// What the local simulation knows about the owner this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnerCues {
    /// Owner moved more than the movement threshold since last tick.
    pub moving: bool,
    /// How long the owner has been still.
    pub idle_for: Duration,
    /// Owner stillness after which the pet falls asleep.
    pub sleep_after: Duration,
    /// A collectible is in range and none is being chased.
    pub collectible_nearby: bool,
    /// The chased collectible was picked up, vanished or left the leash.
    pub collect_done: bool,
}

/// Observations a pet's transitions read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PetContext {
    /// Distance to the current target before moving.
    pub remaining: f32,
    /// Owner cues; absent for remote pets.
    pub owner: Option<OwnerCues>,
}

impl From<MotionSample> for PetContext {
    fn from(sample: MotionSample) -> Self {
        Self {
            remaining: sample.remaining,
            owner: None,
        }
    }
}

impl BehaviorState for PetState {
    type Context = PetContext;

    fn one_shot(self) -> Option<Duration> {
        match self {
            // 8 frames at 10 fps
            PetState::Playing => Some(Duration::from_millis(800)),
            _ => None,
        }
    }

    fn preempt(self, ctx: &PetContext) -> Option<Self> {
        let owner = ctx.owner.as_ref()?;
        (owner.collectible_nearby && self != PetState::Collecting).then_some(PetState::Collecting)
    }

    fn transition(self, _elapsed: Duration, ctx: &PetContext) -> Option<Self> {
        let owner = ctx.owner.as_ref()?;
        match self {
            PetState::Following if !owner.moving && ctx.remaining <= ARRIVE_DISTANCE => {
                Some(PetState::Idle)
            }
            PetState::Idle if owner.moving => Some(PetState::Following),
            PetState::Idle if owner.idle_for >= owner.sleep_after => Some(PetState::Sleeping),
            PetState::Sleeping if owner.moving => Some(PetState::Following),
            PetState::Collecting if owner.collect_done => Some(Self::settle(ctx)),
            _ => None,
        }
    }

    fn settle(ctx: &PetContext) -> Self {
        match ctx.owner {
            Some(owner) if owner.moving => PetState::Following,
            _ => PetState::Idle,
        }
    }

    fn animation_key(self, variant: u8) -> &'static str {
        match self {
            PetState::Following | PetState::Collecting => "red_panda_move",
            PetState::Idle if variant == 2 => "red_panda_idle2",
            PetState::Idle => "red_panda_idle1",
            PetState::Playing => "red_panda_play",
            PetState::Sleeping => "red_panda_sleep",
        }
    }
}

/// Something on the ground a companion can pick up for its owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collectible {
    /// Caller's id for the pickup.
    pub id: u64,
    /// World position.
    pub position: Vec2,
}

/// Companion tuning, read from the `[companion]` config section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Distance of the idle slot from the owner.
    pub orbit_radius: f32,
    /// How far the pet looks for collectibles, and how far from the owner it
    /// will chase one.
    pub collect_radius: f32,
    /// Distance at which a collectible counts as picked up.
    pub collect_reach: f32,
    /// Minimum time between two pushed snapshots.
    pub sync_interval_ms: u64,
    /// Movement that justifies a snapshot on its own.
    pub sync_distance: f32,
    /// Owner movement per tick that counts as moving.
    pub owner_move_threshold: f32,
    /// Chance that an idle variant switch becomes a play instead.
    pub play_chance: f32,
    /// Motion of the local pet.
    pub motion: MotionProfile,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            orbit_radius: 40.0,
            collect_radius: 300.0,
            collect_reach: 15.0,
            sync_interval_ms: 100,
            sync_distance: 5.0,
            owner_move_threshold: 2.0,
            play_chance: 0.15,
            motion: MotionProfile::LOCAL_PET,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SyncMark {
    at: Duration,
    position: Vec2,
    state: PetState,
    variant: u8,
}

/// Local simulation of the player's own companion.
#[derive(Debug)]
pub struct CompanionSim {
    kind: String,
    config: CompanionConfig,
    rng: StdRng,
    position: Vec2,
    facing: Facing,
    machine: BehaviorStateMachine<PetState>,
    orbit_angle: f32,
    orbit_timer: Duration,
    next_variant_switch: Duration,
    sleep_after: Duration,
    owner_last: Vec2,
    owner_moving: bool,
    owner_idle: Duration,
    chasing: Option<Collectible>,
    clock: Duration,
    last_sync: Option<SyncMark>,
}

impl CompanionSim {
    /// Spawn a companion beside `owner`. `seed` drives its random choices.
    pub fn new(kind: impl Into<String>, owner: Vec2, config: CompanionConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let orbit_angle = rng.gen_range(0.0..TAU);
        let position = owner + Vec2::new(config.orbit_radius, 0.0);
        let mut sim = Self {
            kind: kind.into(),
            config,
            rng,
            position,
            facing: Facing::default(),
            machine: BehaviorStateMachine::new(PetState::Idle),
            orbit_angle,
            orbit_timer: Duration::ZERO,
            next_variant_switch: Duration::ZERO,
            sleep_after: Duration::ZERO,
            owner_last: owner,
            owner_moving: false,
            owner_idle: Duration::ZERO,
            chasing: None,
            clock: Duration::ZERO,
            last_sync: None,
        };
        sim.enter(PetState::Idle, None);
        debug!("{} companion spawned at {}", sim.kind, position);
        sim
    }

    /// Pet kind, e.g. `red_panda`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Current position.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Sprite facing.
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Behavior state.
    pub fn state(&self) -> PetState {
        self.machine.state()
    }

    /// Idle animation variant.
    pub fn variant(&self) -> u8 {
        self.machine.variant()
    }

    /// Animation to play.
    pub fn animation_key(&self) -> &'static str {
        self.machine.animation_key()
    }

    /// Render view, keyed by the owner's id.
    pub fn view(&self, owner: EntityId) -> EntityView<PetState> {
        EntityView {
            id: owner,
            position: self.position,
            facing: self.facing,
            state: self.machine.state(),
            animation: self.machine.animation_key(),
        }
    }

    /// Advance the simulation by `dt` with the owner at `owner`.
    ///
    /// Returns the id of a collectible picked up this tick.
    pub fn update(&mut self, dt: Duration, owner: Vec2, collectibles: &[Collectible]) -> Option<u64> {
        self.clock += dt;
        self.observe_owner(owner, dt);

        let mut collect_done = false;
        let mut collected = None;
        if self.machine.state() == PetState::Collecting {
            let current = self
                .chasing
                .and_then(|chased| collectibles.iter().find(|c| c.id == chased.id).copied());
            match current {
                Some(pickup) if pickup.position.distance(owner) > self.config.collect_radius => {
                    debug!("{} companion gave up on a distant pickup", self.kind);
                    self.chasing = None;
                    collect_done = true;
                }
                Some(pickup)
                    if pickup.position.distance(self.position) <= self.config.collect_reach =>
                {
                    debug!("{} companion collected pickup {}", self.kind, pickup.id);
                    collected = Some(pickup.id);
                    self.chasing = None;
                    collect_done = true;
                }
                Some(pickup) => self.chasing = Some(pickup),
                None => {
                    self.chasing = None;
                    collect_done = true;
                }
            }
        }

        let candidate = if self.machine.state() == PetState::Collecting {
            None
        } else {
            self.nearest_collectible(owner, collectibles, collected)
        };

        let ctx = PetContext {
            remaining: self.position.distance(self.target(owner)),
            owner: Some(OwnerCues {
                moving: self.owner_moving,
                idle_for: self.owner_idle,
                sleep_after: self.sleep_after,
                collectible_nearby: candidate.is_some(),
                collect_done,
            }),
        };

        match self.machine.advance(dt, &ctx) {
            Some(next) => self.enter(next, candidate),
            None if self.machine.state() == PetState::Idle => self.idle_tick(dt),
            None => {}
        }

        let step = step_toward(self.position, self.target(owner), dt, &self.config.motion);
        self.position = step.position;
        if let Some(facing) = step.facing {
            self.facing = facing;
        }

        collected
    }

    /// Snapshot to push, if the throttle allows one now.
    ///
    /// At most one per sync interval, and only when the pet moved far enough
    /// or its state or idle variant changed.
    pub fn sync_snapshot(&mut self) -> Option<PetSnapshot> {
        let state = self.machine.state();
        let variant = self.machine.variant();
        let due = match &self.last_sync {
            None => true,
            Some(mark) => {
                let interval = Duration::from_millis(self.config.sync_interval_ms);
                self.clock.saturating_sub(mark.at) >= interval
                    && (mark.position.distance(self.position) >= self.config.sync_distance
                        || mark.state != state
                        || mark.variant != variant)
            }
        };
        if !due {
            return None;
        }

        self.last_sync = Some(SyncMark {
            at: self.clock,
            position: self.position,
            state,
            variant,
        });
        trace!("{} companion sync at {}", self.kind, self.position);
        Some(PetSnapshot {
            position: self.position.round(),
            state: state.to_remote(),
            facing: self.facing,
            idle_variant: variant,
        })
    }

    /// Put the companion back beside a respawned owner.
    pub fn teleport(&mut self, owner: Vec2) {
        self.position = owner + Vec2::new(self.config.orbit_radius, 0.0);
        self.owner_last = owner;
        self.chasing = None;
        if self.machine.state() == PetState::Collecting {
            self.machine.force(PetState::Idle);
            self.enter(PetState::Idle, None);
        }
    }

    fn observe_owner(&mut self, owner: Vec2, dt: Duration) {
        if self.owner_last.distance(owner) > self.config.owner_move_threshold {
            self.owner_moving = true;
            self.owner_idle = Duration::ZERO;
        } else {
            self.owner_moving = false;
            self.owner_idle += dt;
        }
        self.owner_last = owner;
    }

    fn nearest_collectible(
        &self,
        owner: Vec2,
        collectibles: &[Collectible],
        skip: Option<u64>,
    ) -> Option<Collectible> {
        let radius = self.config.collect_radius;
        collectibles
            .iter()
            .filter(|c| Some(c.id) != skip)
            .filter(|c| c.position.distance(owner) <= radius)
            .map(|c| (c.position.distance(self.position), c))
            .filter(|(dist, _)| *dist < radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, c)| *c)
    }

    fn target(&self, owner: Vec2) -> Vec2 {
        match self.chasing {
            Some(pickup) if self.machine.state() == PetState::Collecting => pickup.position,
            _ => owner + Vec2::from_angle(self.orbit_angle) * self.config.orbit_radius,
        }
    }

    fn enter(&mut self, state: PetState, candidate: Option<Collectible>) {
        match state {
            PetState::Idle => {
                let variant = if self.rng.gen_bool(0.5) { 1 } else { 2 };
                self.machine.set_variant(variant);
                self.next_variant_switch = self.roll_millis(3_000, 6_000);
                self.sleep_after = self.roll_millis(5_000, 10_000);
            }
            PetState::Collecting => self.chasing = candidate,
            _ => {}
        }
        if state != PetState::Collecting {
            self.chasing = None;
        }
        trace!("{} companion now {:?}", self.kind, state);
    }

    fn idle_tick(&mut self, dt: Duration) {
        if self.machine.elapsed() >= self.next_variant_switch {
            if self.rng.gen::<f32>() < self.config.play_chance {
                self.machine.force(PetState::Playing);
                return;
            }
            let next = if self.machine.variant() == 1 { 2 } else { 1 };
            self.machine.set_variant(next);
            self.machine.restart_timer();
            self.next_variant_switch = self.roll_millis(3_000, 6_000);
        }

        self.orbit_timer += dt;
        if self.orbit_timer >= Duration::from_secs(5) {
            self.orbit_timer = Duration::ZERO;
            self.orbit_angle = self.rng.gen_range(0.0..TAU);
        }
    }

    fn roll_millis(&mut self, min: u64, max: u64) -> Duration {
        Duration::from_millis(self.rng.gen_range(min..=max))
    }
}
