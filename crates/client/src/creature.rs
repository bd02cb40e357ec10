//! Hostile creatures driven by the server's spawn system.

use crate::behavior::BehaviorState;
use crate::motion::MotionSample;
use klyra_net::RemoteState;
use std::time::Duration;

/// Remaining distance above which a creature is drawn running.
const RUN_THRESHOLD: f32 = 3.0;

/// Behavior of a hostile creature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreatureState {
    /// Standing.
    Idle,
    /// Running toward its target.
    Running,
    /// Attack swing (9 frames at 12 fps).
    Attacking,
    /// Damage reaction (3 frames at 12 fps).
    Hurt,
    /// Death animation, until the despawn arrives.
    Dying,
}

impl CreatureState {
    /// Map a pushed state; `None` for states creatures never take.
    pub fn from_remote(state: RemoteState) -> Option<Self> {
        match state {
            RemoteState::Idle => Some(CreatureState::Idle),
            RemoteState::Moving | RemoteState::Following => Some(CreatureState::Running),
            RemoteState::Attacking => Some(CreatureState::Attacking),
            RemoteState::Hurt => Some(CreatureState::Hurt),
            RemoteState::Dying => Some(CreatureState::Dying),
            RemoteState::Playing | RemoteState::Sleeping | RemoteState::Collecting => None,
        }
    }
}

impl BehaviorState for CreatureState {
    type Context = MotionSample;

    fn one_shot(self) -> Option<Duration> {
        match self {
            CreatureState::Attacking => Some(Duration::from_millis(750)),
            CreatureState::Hurt => Some(Duration::from_millis(250)),
            _ => None,
        }
    }

    fn transition(self, _elapsed: Duration, ctx: &MotionSample) -> Option<Self> {
        match self {
            CreatureState::Idle if ctx.remaining > RUN_THRESHOLD => Some(CreatureState::Running),
            CreatureState::Running if ctx.remaining <= RUN_THRESHOLD => Some(CreatureState::Idle),
            _ => None,
        }
    }

    fn settle(ctx: &MotionSample) -> Self {
        if ctx.remaining > RUN_THRESHOLD {
            CreatureState::Running
        } else {
            CreatureState::Idle
        }
    }

    fn animation_key(self, _variant: u8) -> &'static str {
        match self {
            CreatureState::Idle => "minotaur_idle",
            CreatureState::Running => "minotaur_run",
            CreatureState::Attacking => "minotaur_attack",
            CreatureState::Hurt => "minotaur_damage",
            CreatureState::Dying => "minotaur_death",
        }
    }
}
