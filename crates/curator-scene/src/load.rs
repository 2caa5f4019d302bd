//! Document loading and validation
//!
//! The loader is a two-pass walk, mirroring how the format is authored:
//! first the document's overall shape is deserialized (with actions and
//! transitions kept as raw JSON so errors can name their state and index),
//! then every action, timeline entry, and transition is individually
//! converted and checked. Unknown metadata fields are ignored for forward
//! compatibility; unknown `action`/`type` discriminators are rejected.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::{SceneError, SceneResult};
use crate::model::{Action, Scene, SceneState, TimelineEntry, Transition, Trigger, END_STATE};

const ACTION_KINDS: &[&str] = &["mqtt", "audio", "video"];
const TRANSITION_KINDS: &[&str] = &[
    "timeout", "mqtt", "button", "audioEnd", "videoEnd", "always",
];

/// Scope label used for scene-level transition rules in error reports
const GLOBAL_SCOPE: &str = "globalEvents";

/// Raw document shape; actions and transitions stay untyped until the
/// per-item pass so errors carry positions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneDoc {
    scene_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    global_prefix: String,
    initial_state: String,
    #[serde(default)]
    global_events: Vec<Value>,
    states: IndexMap<String, StateDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDoc {
    #[serde(default)]
    description: String,
    #[serde(default)]
    on_enter: Vec<Value>,
    #[serde(default)]
    on_exit: Vec<Value>,
    #[serde(default)]
    timeline: Vec<Value>,
    #[serde(default)]
    transitions: Vec<Value>,
}

impl Scene {
    /// Load and validate a scene from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> SceneResult<Scene> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| SceneError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    /// Load and validate a scene from a JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> SceneResult<Scene> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    /// Validate a parsed JSON document into a scene graph
    ///
    /// All-or-nothing: either every rule passes and a complete `Scene` is
    /// returned, or the first violation is reported and nothing escapes.
    pub fn from_value(value: Value) -> SceneResult<Scene> {
        let doc: SceneDoc = serde_json::from_value(value)?;

        if doc.scene_id.trim().is_empty() {
            return Err(SceneError::EmptyField { field: "sceneId" });
        }
        if doc.initial_state.trim().is_empty() {
            return Err(SceneError::EmptyField { field: "initialState" });
        }

        let prefix = doc.global_prefix.as_str();

        let mut states = IndexMap::with_capacity(doc.states.len());
        for (name, raw) in doc.states {
            let state = convert_state(&name, raw, prefix)?;
            states.insert(name, state);
        }

        let global_events = convert_transitions(GLOBAL_SCOPE, &doc.global_events, prefix)?;

        let scene = Scene {
            scene_id: doc.scene_id,
            description: doc.description,
            version: doc.version,
            global_prefix: doc.global_prefix,
            initial_state: doc.initial_state,
            global_events,
            states,
        };

        check_references(&scene)?;

        info!(
            scene_id = %scene.scene_id,
            states = scene.states.len(),
            "Scene validated"
        );
        Ok(scene)
    }

    /// Re-emit this scene as a document
    ///
    /// The emitted document re-validates to an equal in-memory graph.
    /// Topics are emitted in resolved form, which resolution leaves
    /// unchanged on a second pass.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).expect("scene graph is always serializable")
    }
}

fn convert_state(name: &str, raw: StateDoc, prefix: &str) -> SceneResult<SceneState> {
    let on_enter = convert_actions(name, &raw.on_enter, prefix)?;
    let on_exit = convert_actions(name, &raw.on_exit, prefix)?;
    let timeline = convert_timeline(name, &raw.timeline, prefix)?;
    let transitions = convert_transitions(name, &raw.transitions, prefix)?;

    Ok(SceneState {
        description: raw.description,
        on_enter,
        on_exit,
        timeline,
        transitions,
    })
}

fn convert_actions(scope: &str, raw: &[Value], prefix: &str) -> SceneResult<Vec<Action>> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| convert_action(scope, index, value, prefix))
        .collect()
}

fn convert_action(scope: &str, index: usize, value: &Value, prefix: &str) -> SceneResult<Action> {
    let obj = value.as_object().ok_or_else(|| SceneError::InvalidAction {
        scope: scope.to_string(),
        index,
        message: "not an object".to_string(),
    })?;

    let kind = obj
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| SceneError::InvalidAction {
            scope: scope.to_string(),
            index,
            message: "missing 'action' discriminator".to_string(),
        })?;

    if !ACTION_KINDS.contains(&kind) {
        return Err(SceneError::UnknownActionKind {
            scope: scope.to_string(),
            index,
            kind: kind.to_string(),
        });
    }

    let action: Action =
        serde_json::from_value(value.clone()).map_err(|e| SceneError::InvalidAction {
            scope: scope.to_string(),
            index,
            message: e.to_string(),
        })?;

    match action {
        Action::Mqtt {
            topic,
            message,
            retain,
        } => {
            let topic = resolve_topic(prefix, &topic);
            if topic.is_empty() {
                return Err(SceneError::EmptyTopic {
                    scope: scope.to_string(),
                    index,
                });
            }
            Ok(Action::Mqtt {
                topic,
                message,
                retain,
            })
        }
        other => Ok(other),
    }
}

fn convert_timeline(scope: &str, raw: &[Value], prefix: &str) -> SceneResult<Vec<TimelineEntry>> {
    let mut entries = Vec::with_capacity(raw.len());

    for (index, value) in raw.iter().enumerate() {
        let obj = value
            .as_object()
            .ok_or_else(|| SceneError::InvalidTimelineEntry {
                scope: scope.to_string(),
                index,
                message: "not an object".to_string(),
            })?;

        let at = obj
            .get("at")
            .and_then(Value::as_f64)
            .ok_or_else(|| SceneError::InvalidTimelineEntry {
                scope: scope.to_string(),
                index,
                message: "missing or non-numeric 'at' offset".to_string(),
            })?;

        if !at.is_finite() || at < 0.0 {
            return Err(SceneError::InvalidTimelineOffset {
                scope: scope.to_string(),
                index,
                at,
            });
        }

        // An entry is either a single inline action or an `actions` group.
        let actions = if obj.contains_key("action") {
            vec![convert_action(scope, index, value, prefix)?]
        } else if let Some(group) = obj.get("actions") {
            let group = group
                .as_array()
                .ok_or_else(|| SceneError::InvalidTimelineEntry {
                    scope: scope.to_string(),
                    index,
                    message: "'actions' is not a list".to_string(),
                })?;
            group
                .iter()
                .map(|a| convert_action(scope, index, a, prefix))
                .collect::<SceneResult<Vec<_>>>()?
        } else {
            return Err(SceneError::InvalidTimelineEntry {
                scope: scope.to_string(),
                index,
                message: "no action or actions list".to_string(),
            });
        };

        entries.push(TimelineEntry { at, actions });
    }

    // Stable sort: equal offsets keep declaration order.
    entries.sort_by(|a, b| a.at.partial_cmp(&b.at).expect("offsets are finite"));
    Ok(entries)
}

fn convert_transitions(scope: &str, raw: &[Value], prefix: &str) -> SceneResult<Vec<Transition>> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| convert_transition(scope, index, value, prefix))
        .collect()
}

fn convert_transition(
    scope: &str,
    index: usize,
    value: &Value,
    prefix: &str,
) -> SceneResult<Transition> {
    let obj = value
        .as_object()
        .ok_or_else(|| SceneError::InvalidTransition {
            scope: scope.to_string(),
            index,
            message: "not an object".to_string(),
        })?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SceneError::InvalidTransition {
            scope: scope.to_string(),
            index,
            message: "missing 'type' discriminator".to_string(),
        })?;

    if !TRANSITION_KINDS.contains(&kind) {
        return Err(SceneError::UnknownTransitionKind {
            scope: scope.to_string(),
            index,
            kind: kind.to_string(),
        });
    }

    let mut transition: Transition =
        serde_json::from_value(value.clone()).map_err(|e| SceneError::InvalidTransition {
            scope: scope.to_string(),
            index,
            message: e.to_string(),
        })?;

    match &mut transition.trigger {
        Trigger::Timeout { delay } => {
            if !delay.is_finite() || *delay < 0.0 {
                return Err(SceneError::InvalidTransition {
                    scope: scope.to_string(),
                    index,
                    message: format!("invalid timeout delay {delay}"),
                });
            }
        }
        Trigger::Mqtt { topic, .. } => {
            let resolved = resolve_topic(prefix, topic);
            if resolved.is_empty() {
                return Err(SceneError::InvalidTransition {
                    scope: scope.to_string(),
                    index,
                    message: "empty trigger topic".to_string(),
                });
            }
            *topic = resolved;
        }
        _ => {}
    }

    Ok(transition)
}

/// Resolve a topic against the scene's global prefix
///
/// Topics containing a `/` are absolute; bare device names are namespaced
/// under the prefix.
fn resolve_topic(prefix: &str, topic: &str) -> String {
    let topic = topic.trim();
    if topic.is_empty() || topic.contains('/') || prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}/{topic}")
    }
}

/// Reference checks that need the whole graph: the initial state and every
/// `goto` must resolve, and a state without transitions must be the
/// terminal state.
fn check_references(scene: &Scene) -> SceneResult<()> {
    if !Scene::is_terminal(&scene.initial_state) && !scene.states.contains_key(&scene.initial_state)
    {
        return Err(SceneError::InitialStateMissing {
            name: scene.initial_state.clone(),
        });
    }

    for (name, state) in &scene.states {
        if state.transitions.is_empty() && name != END_STATE {
            return Err(SceneError::DeadEndState {
                state: name.clone(),
            });
        }

        for (index, transition) in state.transitions.iter().enumerate() {
            check_target(scene, name, index, &transition.to)?;
        }
    }

    for (index, event) in scene.global_events.iter().enumerate() {
        check_target(scene, GLOBAL_SCOPE, index, &event.to)?;
    }

    Ok(())
}

fn check_target(scene: &Scene, scope: &str, index: usize, target: &str) -> SceneResult<()> {
    if Scene::is_terminal(target) || scene.states.contains_key(target) {
        Ok(())
    } else {
        Err(SceneError::UnknownTransitionTarget {
            scope: scope.to_string(),
            index,
            target: target.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_scene(states: &str) -> String {
        format!(
            r#"{{
                "sceneId": "test-scene",
                "initialState": "intro",
                "states": {states}
            }}"#
        )
    }

    const INTRO_ONLY: &str = r#"{
        "intro": {
            "transitions": [{"type": "timeout", "delay": 5.0, "goto": "END"}]
        }
    }"#;

    #[test]
    fn load_minimal_scene() {
        let scene = Scene::from_str(&minimal_scene(INTRO_ONLY)).unwrap();
        assert_eq!(scene.scene_id, "test-scene");
        assert_eq!(scene.initial_state, "intro");
        assert_eq!(scene.states.len(), 1);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scene.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(minimal_scene(INTRO_ONLY).as_bytes()).unwrap();

        let scene = Scene::from_file(&path).unwrap();
        assert_eq!(scene.scene_id, "test-scene");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Scene::from_file("/nonexistent/scene.json").unwrap_err();
        assert!(matches!(err, SceneError::ReadFile { .. }));
    }

    #[test]
    fn empty_scene_id_rejected() {
        let doc = r#"{"sceneId": "  ", "initialState": "intro", "states": {}}"#;
        let err = Scene::from_str(doc).unwrap_err();
        assert!(matches!(err, SceneError::EmptyField { field: "sceneId" }));
    }

    #[test]
    fn missing_initial_state_rejected() {
        let doc = minimal_scene(r#"{"other": {"transitions": [{"type": "always", "goto": "END"}]}}"#);
        let err = Scene::from_str(&doc).unwrap_err();
        assert!(matches!(err, SceneError::InitialStateMissing { name } if name == "intro"));
    }

    #[test]
    fn unknown_goto_target_named() {
        let doc = minimal_scene(
            r#"{"intro": {"transitions": [{"type": "timeout", "delay": 1.0, "goto": "nowhere"}]}}"#,
        );
        let err = Scene::from_str(&doc).unwrap_err();
        match err {
            SceneError::UnknownTransitionTarget { scope, index, target } => {
                assert_eq!(scope, "intro");
                assert_eq!(index, 0);
                assert_eq!(target, "nowhere");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_action_kind_names_state_and_index() {
        let doc = minimal_scene(
            r#"{"intro": {
                "onEnter": [
                    {"action": "mqtt", "topic": "room1/light", "message": "ON"},
                    {"action": "laser", "message": "FIRE"}
                ],
                "transitions": [{"type": "always", "goto": "END"}]
            }}"#,
        );
        let err = Scene::from_str(&doc).unwrap_err();
        match err {
            SceneError::UnknownActionKind { scope, index, kind } => {
                assert_eq!(scope, "intro");
                assert_eq!(index, 1);
                assert_eq!(kind, "laser");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_transition_kind_rejected() {
        let doc = minimal_scene(
            r#"{"intro": {"transitions": [{"type": "gesture", "goto": "END"}]}}"#,
        );
        let err = Scene::from_str(&doc).unwrap_err();
        assert!(matches!(err, SceneError::UnknownTransitionKind { kind, .. } if kind == "gesture"));
    }

    #[test]
    fn unknown_metadata_ignored_everywhere() {
        let doc = r##"{
            "sceneId": "s",
            "initialState": "intro",
            "editorVersion": "9.9",
            "states": {
                "intro": {
                    "color": "#ff0000",
                    "onEnter": [{"action": "audio", "message": "PLAY:a.wav:0.5", "note": "x"}],
                    "transitions": [{"type": "always", "goto": "END", "label": "done"}]
                }
            }
        }"##;
        let scene = Scene::from_str(doc).unwrap();
        assert_eq!(scene.states["intro"].on_enter.len(), 1);
    }

    #[test]
    fn negative_timeline_offset_rejected() {
        let doc = minimal_scene(
            r#"{"intro": {
                "timeline": [{"at": -1.0, "action": "audio", "message": "STOP"}],
                "transitions": [{"type": "always", "goto": "END"}]
            }}"#,
        );
        let err = Scene::from_str(&doc).unwrap_err();
        assert!(matches!(err, SceneError::InvalidTimelineOffset { at, .. } if at == -1.0));
    }

    #[test]
    fn timeline_sorted_with_stable_ties() {
        let doc = minimal_scene(
            r#"{"intro": {
                "timeline": [
                    {"at": 5.0, "action": "audio", "message": "third"},
                    {"at": 2.0, "action": "audio", "message": "first"},
                    {"at": 5.0, "action": "audio", "message": "fourth"},
                    {"at": 2.0, "action": "audio", "message": "second"}
                ],
                "transitions": [{"type": "always", "goto": "END"}]
            }}"#,
        );
        let scene = Scene::from_str(&doc).unwrap();
        let messages: Vec<&str> = scene.states["intro"]
            .timeline
            .iter()
            .flat_map(|e| &e.actions)
            .map(|a| match a {
                Action::Audio { message } => message.as_str(),
                _ => panic!("expected audio"),
            })
            .collect();
        assert_eq!(messages, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn timeline_action_group_supported() {
        let doc = minimal_scene(
            r#"{"intro": {
                "timeline": [{"at": 1.0, "actions": [
                    {"action": "mqtt", "topic": "room1/light", "message": "OFF"},
                    {"action": "video", "message": "STOP_VIDEO"}
                ]}],
                "transitions": [{"type": "always", "goto": "END"}]
            }}"#,
        );
        let scene = Scene::from_str(&doc).unwrap();
        assert_eq!(scene.states["intro"].timeline[0].actions.len(), 2);
    }

    #[test]
    fn relative_topics_resolved_against_prefix() {
        let doc = r#"{
            "sceneId": "s",
            "initialState": "intro",
            "globalPrefix": "room7",
            "states": {
                "intro": {
                    "onEnter": [
                        {"action": "mqtt", "topic": "light", "message": "ON"},
                        {"action": "mqtt", "topic": "devices/fan/cmd", "message": "ON"}
                    ],
                    "transitions": [
                        {"type": "mqtt", "topic": "door", "message": "OPEN", "goto": "END"}
                    ]
                }
            }
        }"#;
        let scene = Scene::from_str(doc).unwrap();
        let enter = &scene.states["intro"].on_enter;
        assert!(matches!(&enter[0], Action::Mqtt { topic, .. } if topic == "room7/light"));
        assert!(matches!(&enter[1], Action::Mqtt { topic, .. } if topic == "devices/fan/cmd"));
        assert!(matches!(
            &scene.states["intro"].transitions[0].trigger,
            Trigger::Mqtt { topic, .. } if topic == "room7/door"
        ));
    }

    #[test]
    fn empty_resolved_topic_rejected() {
        let doc = minimal_scene(
            r#"{"intro": {
                "onEnter": [{"action": "mqtt", "topic": "  ", "message": "ON"}],
                "transitions": [{"type": "always", "goto": "END"}]
            }}"#,
        );
        let err = Scene::from_str(&doc).unwrap_err();
        assert!(matches!(err, SceneError::EmptyTopic { scope, index: 0 } if scope == "intro"));
    }

    #[test]
    fn dead_end_state_flagged() {
        let doc = minimal_scene(
            r#"{
                "intro": {"transitions": [{"type": "timeout", "delay": 1.0, "goto": "stuck"}]},
                "stuck": {}
            }"#,
        );
        let err = Scene::from_str(&doc).unwrap_err();
        assert!(matches!(err, SceneError::DeadEndState { state } if state == "stuck"));
    }

    #[test]
    fn declared_end_state_is_terminal_without_transitions() {
        let doc = minimal_scene(
            r#"{
                "intro": {"transitions": [{"type": "timeout", "delay": 1.0, "goto": "END"}]},
                "END": {"onEnter": [{"action": "video", "message": "STOP_VIDEO"}]}
            }"#,
        );
        let scene = Scene::from_str(&doc).unwrap();
        assert!(scene.states.contains_key("END"));
    }

    #[test]
    fn cycles_are_legal() {
        let doc = minimal_scene(
            r#"{
                "intro": {"transitions": [{"type": "timeout", "delay": 1.0, "goto": "loop"}]},
                "loop": {"transitions": [{"type": "timeout", "delay": 1.0, "goto": "intro"}]}
            }"#,
        );
        assert!(Scene::from_str(&doc).is_ok());
    }

    #[test]
    fn global_event_target_checked() {
        let doc = r#"{
            "sceneId": "s",
            "initialState": "intro",
            "globalEvents": [{"type": "mqtt", "topic": "room1/emergency", "message": "STOP", "goto": "missing"}],
            "states": {
                "intro": {"transitions": [{"type": "always", "goto": "END"}]}
            }
        }"#;
        let err = Scene::from_str(doc).unwrap_err();
        match err {
            SceneError::UnknownTransitionTarget { scope, target, .. } => {
                assert_eq!(scope, "globalEvents");
                assert_eq!(target, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_is_deterministic() {
        let doc = minimal_scene(INTRO_ONLY);
        let a = Scene::from_str(&doc).unwrap();
        let b = Scene::from_str(&doc).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn export_round_trips_to_equal_graph() {
        let doc = r#"{
            "sceneId": "round-trip",
            "description": "exercise every construct",
            "version": "1.2",
            "globalPrefix": "room3",
            "initialState": "intro",
            "globalEvents": [{"type": "mqtt", "topic": "emergency", "message": "STOP", "goto": "END"}],
            "states": {
                "intro": {
                    "description": "first",
                    "onEnter": [{"action": "mqtt", "topic": "light", "message": "ON"}],
                    "onExit": [{"action": "audio", "message": "STOP"}],
                    "timeline": [{"at": 3.0, "action": "mqtt", "topic": "motor2", "message": "ON:30:R"}],
                    "transitions": [
                        {"type": "timeout", "delay": 5.0, "goto": "middle"},
                        {"type": "button", "button": "panel", "goto": "END"}
                    ]
                },
                "middle": {
                    "transitions": [{"type": "audioEnd", "target": "narration.wav", "goto": "END"}]
                }
            }
        }"#;
        let scene = Scene::from_str(doc).unwrap();
        let exported = scene.to_document();
        let reloaded = Scene::from_value(exported).unwrap();
        assert_eq!(scene, reloaded);
    }
}
