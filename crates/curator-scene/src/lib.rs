//! Scene document model and validator
//!
//! A scene is the declarative description of one complete exhibit sequence:
//! a set of named states, each with entry/exit actions, a timeline of
//! scheduled actions, and transition rules. This crate owns the JSON file
//! format contract with the authoring tools and turns documents into
//! validated, immutable [`Scene`] graphs.
//!
//! Validation is all-or-nothing: a document either yields a fully checked
//! `Scene` or a [`SceneError`] naming the offending state and index. No
//! partially constructed scene ever escapes.

mod error;
mod load;
mod model;

pub use error::{SceneError, SceneResult};
pub use model::{
    Action, Scene, SceneState, TimelineEntry, Transition, Trigger, END_STATE,
};
