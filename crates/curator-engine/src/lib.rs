//! Scene state-machine executor and action dispatcher
//!
//! The executor interprets a validated [`curator_scene::Scene`] as a timed
//! state machine: it runs entry/exit actions, arms timeline and transition
//! timers, evaluates triggers, and performs state changes. All stimuli
//! (network messages, button presses, media completion, timer fires, control
//! commands) funnel through one event channel into a single consumer task,
//! so exactly one transition wins per state activation without locks.
//!
//! Effects leave through the [`Dispatcher`], which owns the seams to the
//! messaging client and the audio/video playback collaborators. Dispatch
//! failures are logged and reported on the status surface but never stall
//! or reposition the state machine.

mod dispatch;
mod event;
mod executor;
mod status;

pub use dispatch::{
    ActionSource, CollaboratorError, DispatchError, Dispatcher, MediaPlayer, MessagePublisher,
};
pub use event::{engine_channel, EngineCommand, EngineEvent, EngineHandle, TimerFired, TimerKind};
pub use executor::Executor;
pub use status::{EngineStatus, Heartbeat, Phase};
