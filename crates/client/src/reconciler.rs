//! Per-entity reconciliation of authoritative targets into smooth visuals.
//!
//! Inbound events only ever move an entity's target; the visual position is
//! advanced toward it by [`Reconciler::tick`]. The only exceptions are first
//! observation and explicit teleports, which place the visual directly.
//! Positions that are not finite are rejected and leave the record untouched.

use crate::behavior::{BehaviorState, BehaviorStateMachine};
use crate::motion::{step_toward, MotionProfile, MotionSample};
use klyra_core::{EntityId, Facing, Timestamp, Vec2};
use klyra_net::Movement;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Client-side record of one remote-controlled entity.
#[derive(Debug, Clone)]
pub struct RemoteEntity<S> {
    target: Vec2,
    visual: Vec2,
    facing: Facing,
    behavior: BehaviorStateMachine<S>,
    last_update: Timestamp,
}

impl<S: BehaviorState> RemoteEntity<S> {
    fn new(position: Vec2, state: S, now: Timestamp) -> Self {
        Self {
            target: position,
            visual: position,
            facing: Facing::default(),
            behavior: BehaviorStateMachine::new(state),
            last_update: now,
        }
    }

    /// Last authoritative position.
    pub fn target(&self) -> Vec2 {
        self.target
    }

    /// Rendered position.
    pub fn visual(&self) -> Vec2 {
        self.visual
    }

    /// Sprite facing.
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Behavior state.
    pub fn state(&self) -> S {
        self.behavior.state()
    }

    /// Animation key for the current state.
    pub fn animation_key(&self) -> &'static str {
        self.behavior.animation_key()
    }

    /// Idle animation variant.
    pub fn variant(&self) -> u8 {
        self.behavior.variant()
    }

    /// When the last inbound event touched this entity. Staleness hint only.
    pub fn last_update(&self) -> Timestamp {
        self.last_update
    }
}

/// What the renderer reads for one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityView<S> {
    /// Entity id.
    pub id: EntityId,
    /// Rendered position.
    pub position: Vec2,
    /// Sprite facing.
    pub facing: Facing,
    /// Behavior state.
    pub state: S,
    /// Animation to play.
    pub animation: &'static str,
}

/// Owns every [`RemoteEntity`] of one kind, keyed by id.
#[derive(Debug, Clone)]
pub struct Reconciler<S> {
    label: &'static str,
    profile: MotionProfile,
    entities: HashMap<EntityId, RemoteEntity<S>>,
}

impl<S> Reconciler<S>
where
    S: BehaviorState,
    S::Context: From<MotionSample>,
{
    /// Create an empty reconciler. `label` names the kind in logs.
    pub fn new(label: &'static str, profile: MotionProfile) -> Self {
        Self {
            label,
            profile,
            entities: HashMap::new(),
        }
    }

    /// Motion profile applied to every entity.
    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    /// Record a newly observed entity, visible at `position` immediately.
    ///
    /// A spawn for an id that is already tracked acts as a teleport. Returns
    /// false if `position` is not finite.
    pub fn on_spawn(&mut self, id: EntityId, position: Vec2, state: S, now: Timestamp) -> bool {
        if !position.is_finite() {
            warn!("{} {} spawn at non-finite {} rejected", self.label, id, position);
            return false;
        }
        match self.entities.get_mut(&id) {
            Some(entity) => {
                debug!("{} {} respawned in place", self.label, id);
                entity.target = position;
                entity.visual = position;
                entity.behavior.force(state);
                entity.last_update = now;
            }
            None => {
                debug!("{} {} spawned at {}", self.label, id, position);
                self.entities
                    .insert(id, RemoteEntity::new(position, state, now));
            }
        }
        true
    }

    /// Apply an authoritative movement and optional state to a known entity.
    ///
    /// Relative movement is applied to the last authoritative target, not the
    /// visual. Returns false if the entity is unknown or the resulting target
    /// is not finite.
    pub fn on_remote_update(
        &mut self,
        id: EntityId,
        movement: Movement,
        state: Option<S>,
        now: Timestamp,
    ) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            debug!("{} update for unknown {} ignored", self.label, id);
            return false;
        };

        let target = movement.apply(entity.target);
        if !target.is_finite() {
            warn!("{} {} non-finite {:?} rejected", self.label, id, movement);
            return false;
        }
        entity.target = target;
        if let Some(state) = state {
            entity.behavior.force(state);
        }
        entity.last_update = now;
        trace!("{} {} target {}", self.label, id, entity.target);
        true
    }

    /// Apply a discrete state change. Returns false if the entity is unknown.
    pub fn on_state(&mut self, id: EntityId, state: S, now: Timestamp) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            debug!("{} state for unknown {} ignored", self.label, id);
            return false;
        };
        entity.behavior.force(state);
        entity.last_update = now;
        true
    }

    /// Override facing with a pushed value.
    pub fn set_facing(&mut self, id: EntityId, facing: Facing) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.facing = facing;
                true
            }
            None => false,
        }
    }

    /// Override the idle animation variant with a pushed value.
    pub fn set_variant(&mut self, id: EntityId, variant: u8) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.behavior.set_variant(variant);
                true
            }
            None => false,
        }
    }

    /// Place an entity at `position` without sliding.
    pub fn teleport(&mut self, id: EntityId, position: Vec2, now: Timestamp) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            debug!("{} teleport for unknown {} ignored", self.label, id);
            return false;
        };
        if !position.is_finite() {
            warn!("{} {} teleport to non-finite {} rejected", self.label, id, position);
            return false;
        }
        entity.target = position;
        entity.visual = position;
        entity.last_update = now;
        true
    }

    /// Forget an entity. Unknown ids are a no-op.
    pub fn on_despawn(&mut self, id: EntityId) -> Option<RemoteEntity<S>> {
        let removed = self.entities.remove(&id);
        match &removed {
            Some(_) => debug!("{} {} removed", self.label, id),
            None => debug!("{} despawn for unknown {} ignored", self.label, id),
        }
        removed
    }

    /// Advance every entity's visual and behavior by `dt`.
    pub fn tick(&mut self, dt: Duration) {
        for (id, entity) in self.entities.iter_mut() {
            let step = step_toward(entity.visual, entity.target, dt, &self.profile);
            if step.sample.teleported {
                debug!(
                    "{} {} jumped {:.0}px to {}",
                    self.label, id, step.sample.remaining, entity.target
                );
            }
            entity.visual = step.position;
            if let Some(facing) = step.facing {
                entity.facing = facing;
            }

            let ctx = S::Context::from(step.sample);
            entity.behavior.advance(dt, &ctx);
        }
    }

    /// Stop every entity where it is drawn now.
    pub fn freeze(&mut self) {
        for entity in self.entities.values_mut() {
            entity.target = entity.visual;
        }
    }

    /// Ids whose last update is older than `max_age`. Nothing is removed.
    pub fn stale_entities(&self, now: Timestamp, max_age: Duration) -> Vec<EntityId> {
        let max_age = max_age.as_millis() as u64;
        self.entities
            .iter()
            .filter(|(_, entity)| now.millis_since(entity.last_update) > max_age)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Record for `id`.
    pub fn get(&self, id: EntityId) -> Option<&RemoteEntity<S>> {
        self.entities.get(&id)
    }

    /// True if `id` is tracked.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Render views of every tracked entity, in no particular order.
    pub fn views(&self) -> impl Iterator<Item = EntityView<S>> + '_ {
        self.entities.iter().map(|(id, entity)| EntityView {
            id: *id,
            position: entity.visual,
            facing: entity.facing,
            state: entity.behavior.state(),
            animation: entity.behavior.animation_key(),
        })
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Forget every entity.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Blob {
        Still,
        Sliding,
        Bump,
    }

    impl BehaviorState for Blob {
        type Context = MotionSample;

        fn one_shot(self) -> Option<Duration> {
            (self == Blob::Bump).then_some(Duration::from_millis(100))
        }

        fn transition(self, _elapsed: Duration, ctx: &MotionSample) -> Option<Self> {
            match self {
                Blob::Still if ctx.remaining > 1.0 => Some(Blob::Sliding),
                Blob::Sliding if ctx.remaining <= 1.0 => Some(Blob::Still),
                _ => None,
            }
        }

        fn settle(ctx: &MotionSample) -> Self {
            if ctx.remaining > 1.0 {
                Blob::Sliding
            } else {
                Blob::Still
            }
        }

        fn animation_key(self, _variant: u8) -> &'static str {
            match self {
                Blob::Still => "still",
                Blob::Sliding => "slide",
                Blob::Bump => "bump",
            }
        }
    }

    const FRAME: Duration = Duration::from_millis(16);

    fn reconciler() -> Reconciler<Blob> {
        Reconciler::new("blob", MotionProfile::REMOTE_PET)
    }

    #[test]
    fn spawn_shows_target_without_slide() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(1), Vec2::new(40.0, 40.0), Blob::Still, Timestamp(0));
        let entity = rec.get(EntityId(1)).unwrap();
        assert_eq!(entity.visual(), Vec2::new(40.0, 40.0));
        assert_eq!(entity.target(), entity.visual());
    }

    #[test]
    fn update_moves_target_not_visual() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(1), Vec2::ZERO, Blob::Still, Timestamp(0));
        assert!(rec.on_remote_update(
            EntityId(1),
            Movement::Absolute {
                position: Vec2::new(100.0, 0.0)
            },
            None,
            Timestamp(5),
        ));
        let entity = rec.get(EntityId(1)).unwrap();
        assert_eq!(entity.visual(), Vec2::ZERO);
        assert_eq!(entity.last_update(), Timestamp(5));

        rec.tick(FRAME);
        let entity = rec.get(EntityId(1)).unwrap();
        assert!(entity.visual().x > 0.0 && entity.visual().x < 100.0);
        assert_eq!(entity.state(), Blob::Sliding);
        assert_eq!(entity.facing(), Facing::Right);
    }

    #[test]
    fn delta_applies_to_target() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(1), Vec2::new(10.0, 10.0), Blob::Still, Timestamp(0));
        rec.on_remote_update(
            EntityId(1),
            Movement::Delta {
                delta: Vec2::new(-30.0, 0.0),
            },
            None,
            Timestamp(1),
        );
        rec.on_remote_update(
            EntityId(1),
            Movement::Delta {
                delta: Vec2::new(-30.0, 5.0),
            },
            None,
            Timestamp(2),
        );
        assert_eq!(rec.get(EntityId(1)).unwrap().target(), Vec2::new(-50.0, 15.0));
    }

    #[test]
    fn far_update_snaps() {
        let mut rec = Reconciler::<Blob>::new("blob", MotionProfile::AVATAR);
        rec.on_spawn(EntityId(1), Vec2::ZERO, Blob::Still, Timestamp(0));
        rec.on_remote_update(
            EntityId(1),
            Movement::Absolute {
                position: Vec2::new(2000.0, 0.0),
            },
            None,
            Timestamp(1),
        );
        rec.tick(FRAME);
        assert_eq!(rec.get(EntityId(1)).unwrap().visual(), Vec2::new(2000.0, 0.0));
    }

    #[test]
    fn unknown_entities_are_ignored() {
        let mut rec = reconciler();
        assert!(!rec.on_remote_update(
            EntityId(9),
            Movement::Absolute {
                position: Vec2::ONE
            },
            None,
            Timestamp(0)
        ));
        assert!(!rec.on_state(EntityId(9), Blob::Bump, Timestamp(0)));
        assert!(rec.on_despawn(EntityId(9)).is_none());
        assert!(rec.is_empty());
    }

    #[test]
    fn non_finite_positions_are_rejected() {
        let mut rec = reconciler();
        let start = Vec2::new(10.0, 10.0);
        rec.on_spawn(EntityId(1), start, Blob::Still, Timestamp(0));

        assert!(!rec.on_remote_update(
            EntityId(1),
            Movement::Delta {
                delta: Vec2::new(f32::NAN, 0.0)
            },
            Some(Blob::Bump),
            Timestamp(1),
        ));
        assert!(!rec.on_remote_update(
            EntityId(1),
            Movement::Absolute {
                position: Vec2::new(0.0, f32::INFINITY)
            },
            None,
            Timestamp(2),
        ));
        assert!(!rec.teleport(EntityId(1), Vec2::splat(f32::NAN), Timestamp(3)));
        assert!(!rec.on_spawn(EntityId(1), Vec2::new(f32::NEG_INFINITY, 0.0), Blob::Still, Timestamp(4)));
        assert!(!rec.on_spawn(EntityId(2), Vec2::splat(f32::NAN), Blob::Still, Timestamp(4)));

        let entity = rec.get(EntityId(1)).unwrap();
        assert_eq!(entity.target(), start);
        assert_eq!(entity.visual(), start);
        assert_eq!(entity.state(), Blob::Still);
        assert_eq!(entity.last_update(), Timestamp(0));
        assert!(!rec.contains(EntityId(2)));

        // Later valid deltas still apply on top of the untouched target.
        assert!(rec.on_remote_update(
            EntityId(1),
            Movement::Delta {
                delta: Vec2::new(3.0, 0.0)
            },
            None,
            Timestamp(5),
        ));
        for _ in 0..100 {
            rec.tick(FRAME);
        }
        let entity = rec.get(EntityId(1)).unwrap();
        assert_eq!(entity.target(), Vec2::new(13.0, 10.0));
        assert_eq!(entity.visual(), Vec2::new(13.0, 10.0));
    }

    #[test]
    fn pushed_one_shot_returns_to_motion_state() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(1), Vec2::ZERO, Blob::Still, Timestamp(0));
        rec.on_state(EntityId(1), Blob::Bump, Timestamp(1));
        rec.tick(Duration::from_millis(50));
        assert_eq!(rec.get(EntityId(1)).unwrap().animation_key(), "bump");
        rec.tick(Duration::from_millis(60));
        assert_eq!(rec.get(EntityId(1)).unwrap().state(), Blob::Still);
    }

    #[test]
    fn freeze_holds_visual_position() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(1), Vec2::ZERO, Blob::Still, Timestamp(0));
        rec.on_remote_update(
            EntityId(1),
            Movement::Absolute {
                position: Vec2::new(200.0, 0.0),
            },
            None,
            Timestamp(1),
        );
        rec.tick(FRAME);
        let frozen_at = rec.get(EntityId(1)).unwrap().visual();

        rec.freeze();
        for _ in 0..10 {
            rec.tick(FRAME);
        }
        assert_eq!(rec.get(EntityId(1)).unwrap().visual(), frozen_at);
    }

    #[test]
    fn stale_entities_are_reported_not_removed() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(1), Vec2::ZERO, Blob::Still, Timestamp(1_000));
        rec.on_spawn(EntityId(2), Vec2::ZERO, Blob::Still, Timestamp(9_000));

        let stale = rec.stale_entities(Timestamp(10_000), Duration::from_secs(5));
        assert_eq!(stale, vec![EntityId(1)]);
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn teleport_places_visual() {
        let mut rec = reconciler();
        rec.on_spawn(EntityId(4), Vec2::ZERO, Blob::Still, Timestamp(0));
        assert!(rec.teleport(EntityId(4), Vec2::new(64.0, 8.0), Timestamp(3)));
        let view = rec.views().next().unwrap();
        assert_eq!(view.position, Vec2::new(64.0, 8.0));
        assert_eq!(view.animation, "still");
    }
}
