//! Property tests for remote entity interpolation.

use klyra_client::{AvatarState, CreatureState, MotionProfile, Reconciler};
use klyra_core::{EntityId, Timestamp, Vec2};
use klyra_net::Movement;
use proptest::prelude::*;
use std::time::Duration;

const FRAME: Duration = Duration::from_millis(16);

fn ticks_to_arrive(distance: f32, profile: &MotionProfile) -> usize {
    let per_tick = profile.speed * FRAME.as_secs_f32();
    (distance / per_tick).ceil() as usize
}

proptest! {
    #[test]
    fn avatar_lands_on_stationary_target(
        start in (-200.0f32..200.0, -200.0f32..200.0),
        offset in (-300.0f32..300.0, -300.0f32..300.0),
    ) {
        let id = EntityId(1);
        let start = Vec2::new(start.0, start.1);
        let target = start + Vec2::new(offset.0, offset.1);
        let mut avatars = Reconciler::new("avatar", MotionProfile::AVATAR);
        avatars.on_spawn(id, start, AvatarState::Idle, Timestamp(0));
        avatars.on_remote_update(id, Movement::Absolute { position: target }, None, Timestamp(1));

        for _ in 0..ticks_to_arrive(start.distance(target), &MotionProfile::AVATAR) {
            avatars.tick(FRAME);
        }
        prop_assert_eq!(avatars.get(id).unwrap().visual(), target);

        avatars.tick(FRAME);
        avatars.tick(FRAME);
        let avatar = avatars.get(id).unwrap();
        prop_assert_eq!(avatar.visual(), target);
        prop_assert_eq!(avatar.state(), AvatarState::Idle);
    }

    #[test]
    fn deltas_accumulate_on_target_not_visual(
        deltas in prop::collection::vec((-20.0f32..20.0, -20.0f32..20.0), 1..40),
        ticks_between in 0usize..3,
    ) {
        let id = EntityId(2);
        let mut creatures = Reconciler::new("creature", MotionProfile::CREATURE);
        creatures.on_spawn(id, Vec2::ZERO, CreatureState::Idle, Timestamp(0));

        let mut expected = Vec2::ZERO;
        for (dx, dy) in deltas {
            let delta = Vec2::new(dx, dy);
            expected += delta;
            creatures.on_remote_update(id, Movement::Delta { delta }, None, Timestamp(1));
            for _ in 0..ticks_between {
                creatures.tick(FRAME);
            }
        }

        let creature = creatures.get(id).unwrap();
        prop_assert!(creature.target().distance(expected) < 1e-2);

        let remaining = creature.visual().distance(creature.target());
        for _ in 0..=ticks_to_arrive(remaining, &MotionProfile::CREATURE) {
            creatures.tick(FRAME);
        }
        let creature = creatures.get(id).unwrap();
        prop_assert_eq!(creature.visual(), creature.target());
    }

    #[test]
    fn attack_one_shot_always_ends(frames in 1u64..40) {
        let id = EntityId(3);
        let mut avatars = Reconciler::new("avatar", MotionProfile::AVATAR);
        avatars.on_spawn(id, Vec2::ZERO, AvatarState::Idle, Timestamp(0));
        avatars.on_state(id, AvatarState::Attacking, Timestamp(1));

        let dt = Duration::from_millis(frames);
        let mut elapsed = Duration::ZERO;
        while elapsed < Duration::from_millis(500) {
            prop_assert_eq!(avatars.get(id).unwrap().state(), AvatarState::Attacking);
            avatars.tick(dt);
            elapsed += dt;
        }
        prop_assert_eq!(avatars.get(id).unwrap().state(), AvatarState::Idle);
    }
}

#[test]
fn far_update_jumps_instead_of_sliding() {
    let id = EntityId(4);
    let mut avatars = Reconciler::new("avatar", MotionProfile::AVATAR);
    avatars.on_spawn(id, Vec2::ZERO, AvatarState::Idle, Timestamp(0));
    let far = Vec2::new(5000.0, 0.0);
    avatars.on_remote_update(id, Movement::Absolute { position: far }, None, Timestamp(1));

    avatars.tick(FRAME);
    assert_eq!(avatars.get(id).unwrap().visual(), far);
}
