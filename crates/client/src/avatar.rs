//! Other players' avatars.

use crate::behavior::BehaviorState;
use crate::motion::MotionSample;
use klyra_net::RemoteState;
use std::time::Duration;

/// Remaining distance above which an avatar is drawn walking.
const WALK_THRESHOLD: f32 = 1.0;

/// Behavior of a remote player avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvatarState {
    /// Standing.
    Idle,
    /// Walking toward its target.
    Moving,
    /// Attack swing.
    Attacking,
    /// Damage reaction.
    Hurt,
    /// Dead, waiting for respawn or removal.
    Dying,
}

impl AvatarState {
    /// Map a pushed state; `None` for states avatars never take.
    pub fn from_remote(state: RemoteState) -> Option<Self> {
        match state {
            RemoteState::Idle => Some(AvatarState::Idle),
            RemoteState::Moving | RemoteState::Following => Some(AvatarState::Moving),
            RemoteState::Attacking => Some(AvatarState::Attacking),
            RemoteState::Hurt => Some(AvatarState::Hurt),
            RemoteState::Dying => Some(AvatarState::Dying),
            RemoteState::Playing | RemoteState::Sleeping | RemoteState::Collecting => None,
        }
    }
}

impl BehaviorState for AvatarState {
    type Context = MotionSample;

    fn one_shot(self) -> Option<Duration> {
        match self {
            AvatarState::Attacking => Some(Duration::from_millis(500)),
            AvatarState::Hurt => Some(Duration::from_millis(250)),
            _ => None,
        }
    }

    fn transition(self, _elapsed: Duration, ctx: &MotionSample) -> Option<Self> {
        match self {
            AvatarState::Idle if ctx.remaining > WALK_THRESHOLD => Some(AvatarState::Moving),
            AvatarState::Moving if ctx.remaining <= WALK_THRESHOLD => Some(AvatarState::Idle),
            _ => None,
        }
    }

    fn settle(ctx: &MotionSample) -> Self {
        if ctx.remaining > WALK_THRESHOLD {
            AvatarState::Moving
        } else {
            AvatarState::Idle
        }
    }

    fn animation_key(self, _variant: u8) -> &'static str {
        match self {
            AvatarState::Idle => "player_idle",
            AvatarState::Moving => "player_walk",
            AvatarState::Attacking => "player_attack",
            AvatarState::Hurt => "player_hurt",
            AvatarState::Dying => "player_death",
        }
    }
}
