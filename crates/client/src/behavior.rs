//! Generic behavior state machine shared by every entity kind.
//!
//! A kind supplies its state enum, a transition table, an override predicate
//! checked before the table, optional self-terminating one-shot states, and a
//! mapping from state to animation key. Timers are elapsed-time counters owned
//! by the machine, so they disappear with the entity.

use std::fmt;
use std::time::Duration;
use tracing::trace;

/// States of one entity kind's behavior.
pub trait BehaviorState: Copy + Eq + fmt::Debug {
    /// Observations the transitions read each tick.
    type Context;

    /// How long a self-terminating state lasts, `None` for ordinary states.
    fn one_shot(self) -> Option<Duration> {
        None
    }

    /// Priority override checked before the regular transitions.
    fn preempt(self, _ctx: &Self::Context) -> Option<Self> {
        None
    }

    /// Regular transition table. `elapsed` is time spent in `self`.
    fn transition(self, elapsed: Duration, ctx: &Self::Context) -> Option<Self>;

    /// State entered when a one-shot runs out.
    fn settle(ctx: &Self::Context) -> Self;

    /// Animation key for this state. Pure: same inputs, same key.
    fn animation_key(self, variant: u8) -> &'static str;
}

/// Current state plus time spent in it.
#[derive(Debug, Clone)]
pub struct BehaviorStateMachine<S> {
    state: S,
    elapsed: Duration,
    variant: u8,
}

impl<S: BehaviorState> BehaviorStateMachine<S> {
    /// Start in `initial` with idle variant 1.
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            elapsed: Duration::ZERO,
            variant: 1,
        }
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.state
    }

    /// Time spent in the current state.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Idle animation variant.
    pub fn variant(&self) -> u8 {
        self.variant
    }

    /// Animation key for the current state and variant.
    pub fn animation_key(&self) -> &'static str {
        self.state.animation_key(self.variant)
    }

    /// Change the idle variant. Returns true if the animation key changed.
    pub fn set_variant(&mut self, variant: u8) -> bool {
        let before = self.animation_key();
        self.variant = variant;
        before != self.animation_key()
    }

    /// Restart the current state's timer without changing state.
    pub fn restart_timer(&mut self) {
        self.elapsed = Duration::ZERO;
    }

    /// Enter `next` from outside the transition table (authoritative push or
    /// local event). Re-entering a one-shot restarts it. Returns true if the
    /// state changed or restarted.
    pub fn force(&mut self, next: S) -> bool {
        if next == self.state && next.one_shot().is_none() {
            return false;
        }
        self.enter(next);
        true
    }

    /// Advance by `dt`. Returns the new state if a transition fired.
    pub fn advance(&mut self, dt: Duration, ctx: &S::Context) -> Option<S> {
        self.elapsed += dt;

        if let Some(next) = self.state.preempt(ctx) {
            if next != self.state {
                self.enter(next);
                return Some(next);
            }
        }

        if let Some(limit) = self.state.one_shot() {
            if self.elapsed >= limit {
                let next = S::settle(ctx);
                self.enter(next);
                return Some(next);
            }
            return None;
        }

        match self.state.transition(self.elapsed, ctx) {
            Some(next) if next != self.state => {
                self.enter(next);
                Some(next)
            }
            _ => None,
        }
    }

    fn enter(&mut self, next: S) {
        trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.elapsed = Duration::ZERO;
    }
}
