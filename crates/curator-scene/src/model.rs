//! In-memory scene graph types
//!
//! All types here are immutable once a [`Scene`] is constructed by the
//! loader. Hot-reload means validating a new document into a fresh `Scene`
//! and swapping it in; a live scene is never mutated.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Reserved terminal state name
///
/// A `goto` targeting this name needs no matching entry in `states`;
/// reaching it ends the scene.
pub const END_STATE: &str = "END";

/// A validated scene: the declarative description of one exhibit sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// Unique identity of this scene within the deployment's scene store
    pub scene_id: String,

    /// Human description shown by authoring tools
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Document format version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Namespace prepended to relative topic names
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub global_prefix: String,

    /// Name of the state the scene starts in
    pub initial_state: String,

    /// Scene-scoped transitions, evaluated before any state's own rules
    /// with elapsed time measured from scene start
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_events: Vec<Transition>,

    /// Declaration-ordered state map
    pub states: IndexMap<String, SceneState>,
}

impl Scene {
    /// Look up a state by name
    pub fn state(&self, name: &str) -> Option<&SceneState> {
        self.states.get(name)
    }

    /// Check whether a name is the reserved terminal marker
    pub fn is_terminal(name: &str) -> bool {
        name == END_STATE
    }
}

/// One named phase of a scene
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Actions dispatched in declared order when the state is entered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_enter: Vec<Action>,

    /// Actions dispatched in declared order when the state is left
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<Action>,

    /// Scheduled actions, sorted ascending by offset (stable, so entries
    /// due at the same instant keep declaration order)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<TimelineEntry>,

    /// Transition rules in declaration order; the first satisfied rule wins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,
}

/// A single declarative effect
///
/// The `message` payload is an opaque command string whose grammar is owned
/// by the target device or playback collaborator, never parsed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// Publish `message` to `topic` (resolved against the global prefix)
    Mqtt {
        topic: String,
        #[serde(deserialize_with = "de_scalar_string")]
        message: String,
        #[serde(default, skip_serializing_if = "is_false")]
        retain: bool,
    },
    /// Hand `message` to the audio playback collaborator
    Audio {
        #[serde(deserialize_with = "de_scalar_string")]
        message: String,
    },
    /// Hand `message` to the video playback collaborator
    Video {
        #[serde(deserialize_with = "de_scalar_string")]
        message: String,
    },
}

impl Action {
    /// Short kind label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Mqtt { .. } => "mqtt",
            Action::Audio { .. } => "audio",
            Action::Video { .. } => "video",
        }
    }
}

/// An action (or group of actions) scheduled at a fixed offset from state entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Seconds after state entry, non-negative and finite
    pub at: f64,

    /// Actions fired in declared order when the offset is reached
    pub actions: Vec<Action>,
}

/// A rule for leaving a state: a trigger plus the target state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(flatten)]
    pub trigger: Trigger,

    /// Name of the state to enter, or [`END_STATE`]
    #[serde(rename = "goto")]
    pub to: String,
}

/// What causes a transition to fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    /// Elapsed time in the state (or in the scene, for global events)
    Timeout { delay: f64 },
    /// An inbound message matching topic and payload
    Mqtt {
        topic: String,
        #[serde(deserialize_with = "de_scalar_string")]
        message: String,
    },
    /// A physical or network button press matching the identifier
    Button { button: String },
    /// The named audio file finished playing
    AudioEnd { target: String },
    /// The named video file finished playing
    VideoEnd { target: String },
    /// Fires unconditionally as soon as the state becomes active
    Always,
}

impl Trigger {
    /// Short type label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Timeout { .. } => "timeout",
            Trigger::Mqtt { .. } => "mqtt",
            Trigger::Button { .. } => "button",
            Trigger::AudioEnd { .. } => "audioEnd",
            Trigger::VideoEnd { .. } => "videoEnd",
            Trigger::Always => "always",
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Accept string, number, or bool payloads and normalize to a string,
/// matching what authoring tools have historically emitted.
fn de_scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "message must be a string, number, or bool, got {other}"
        ))),
    }
}
