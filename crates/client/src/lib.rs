#![warn(missing_docs)]
//! Client-side state sync: interpolation and behavior for remote entities,
//! the local companion, and the session glue that feeds them.

mod avatar;
mod behavior;
mod companion;
mod creature;
mod motion;
mod multiplayer;
mod reconciler;

pub use avatar::AvatarState;
pub use behavior::{BehaviorState, BehaviorStateMachine};
pub use companion::{
    Collectible, CompanionConfig, CompanionSim, OwnerCues, PetContext, PetState, PET_KINDS,
};
pub use creature::CreatureState;
pub use motion::{facing_toward, step_toward, MotionProfile, MotionSample, Step};
pub use multiplayer::{ReconcilerConfig, SessionNotice, SyncClient, SyncConfig};
pub use reconciler::{EntityView, Reconciler, RemoteEntity};
