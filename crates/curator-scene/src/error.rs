//! Error types for scene loading and validation

use std::path::PathBuf;
use thiserror::Error;

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;

/// Errors that can occur while loading or validating a scene document
///
/// `scope` fields name the place the error was found: a state name, or
/// `"globalEvents"` for scene-level transition rules.
#[derive(Debug, Error)]
pub enum SceneError {
    /// Failed to read the scene file
    #[error("failed to read scene file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not structurally valid JSON for a scene
    #[error("failed to parse scene document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required identity field is empty
    #[error("scene field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    /// `initialState` does not name a declared state
    #[error("initial state '{name}' is not defined")]
    InitialStateMissing { name: String },

    /// A transition's `goto` does not name a declared state
    #[error("in '{scope}': transition {index} targets unknown state '{target}'")]
    UnknownTransitionTarget {
        scope: String,
        index: usize,
        target: String,
    },

    /// An action carries an unrecognized `action` discriminator
    #[error("in '{scope}': action {index} has unknown kind '{kind}'")]
    UnknownActionKind {
        scope: String,
        index: usize,
        kind: String,
    },

    /// A transition carries an unrecognized `type` discriminator
    #[error("in '{scope}': transition {index} has unknown type '{kind}'")]
    UnknownTransitionKind {
        scope: String,
        index: usize,
        kind: String,
    },

    /// An action with a known kind failed to deserialize
    #[error("in '{scope}': action {index} is malformed: {message}")]
    InvalidAction {
        scope: String,
        index: usize,
        message: String,
    },

    /// A transition with a known type failed to deserialize
    #[error("in '{scope}': transition {index} is malformed: {message}")]
    InvalidTransition {
        scope: String,
        index: usize,
        message: String,
    },

    /// An mqtt action's topic resolved to an empty string
    #[error("in '{scope}': action {index} has an empty topic")]
    EmptyTopic { scope: String, index: usize },

    /// A timeline entry is missing `at` or is otherwise malformed
    #[error("in '{scope}': timeline entry {index} is malformed: {message}")]
    InvalidTimelineEntry {
        scope: String,
        index: usize,
        message: String,
    },

    /// A timeline offset is negative or not a finite number
    #[error("in '{scope}': timeline entry {index} has invalid offset {at}")]
    InvalidTimelineOffset {
        scope: String,
        index: usize,
        at: f64,
    },

    /// A non-terminal state has no way out
    #[error("state '{state}' has no transitions and is not the terminal state")]
    DeadEndState { state: String },
}
