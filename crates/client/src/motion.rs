//! Constant-speed interpolation toward a target position.

use klyra_core::{Facing, Vec2};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Slack, in pixels, allowed on the final step so float residue from a long
/// sweep still lands exactly on the target.
const ARRIVAL_EPSILON: f32 = 1e-2;

/// How one kind of entity moves toward its target.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MotionProfile {
    /// Pixels per second.
    pub speed: f32,
    /// At or below this distance the entity lands on its target.
    pub snap_threshold: f32,
    /// Above this distance the entity jumps to its target instantly.
    pub teleport_distance: f32,
    /// Horizontal delta needed before facing changes.
    pub facing_deadzone: f32,
}

impl MotionProfile {
    /// Other players' avatars.
    pub const AVATAR: Self = Self {
        speed: 300.0,
        snap_threshold: 1.0,
        teleport_distance: 500.0,
        facing_deadzone: 1.0,
    };

    /// Hostile creatures.
    pub const CREATURE: Self = Self {
        speed: 240.0,
        snap_threshold: 2.0,
        teleport_distance: 500.0,
        facing_deadzone: 0.5,
    };

    /// Other players' companions; faster than local ones so they catch up.
    pub const REMOTE_PET: Self = Self {
        speed: 200.0,
        snap_threshold: 2.0,
        teleport_distance: 500.0,
        facing_deadzone: 1.0,
    };

    /// The local player's own companion.
    pub const LOCAL_PET: Self = Self {
        speed: 100.0,
        snap_threshold: 5.0,
        teleport_distance: 600.0,
        facing_deadzone: 0.0,
    };
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self::AVATAR
    }
}

/// What the motion step observed, fed to behavior transitions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSample {
    /// Distance to the target before the step.
    pub remaining: f32,
    /// The step jumped instead of sliding.
    pub teleported: bool,
}

/// Result of one interpolation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// New visual position.
    pub position: Vec2,
    /// New facing, if the horizontal delta left the deadzone.
    pub facing: Option<Facing>,
    /// Observations for the behavior layer.
    pub sample: MotionSample,
}

/// Facing implied by moving from `from` toward `to`.
pub fn facing_toward(from: Vec2, to: Vec2, deadzone: f32) -> Option<Facing> {
    let dx = to.x - from.x;
    if dx > deadzone {
        Some(Facing::Right)
    } else if dx < -deadzone {
        Some(Facing::Left)
    } else {
        None
    }
}

/// Advance `current` toward `target` by at most `speed * dt`.
///
/// Lands exactly on `target` once within the snap threshold or once this step
/// covers the rest of the way, so a stationary target is reached in at most
/// `ceil(distance / (speed * dt))` steps and then never moves again. A step
/// never travels further than `speed * dt` plus a hundredth of a pixel.
pub fn step_toward(current: Vec2, target: Vec2, dt: Duration, profile: &MotionProfile) -> Step {
    let delta = target - current;
    let distance = delta.length();
    let facing = facing_toward(current, target, profile.facing_deadzone);

    if distance > profile.teleport_distance {
        return Step {
            position: target,
            facing,
            sample: MotionSample {
                remaining: distance,
                teleported: true,
            },
        };
    }

    let travel = profile.speed * dt.as_secs_f32();
    let position = if distance <= profile.snap_threshold
        || distance - travel <= ARRIVAL_EPSILON
    {
        target
    } else {
        let ratio = (travel / distance).min(1.0);
        current + delta * ratio
    };

    Step {
        position,
        facing,
        sample: MotionSample {
            remaining: distance,
            teleported: false,
        },
    }
}
