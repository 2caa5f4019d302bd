//! Shared topic rules and helpers
//!
//! Centralizes the topic patterns used by the client, the server wiring, and
//! the engine so behavior stays consistent: room command topics, device
//! status topics, and the `/feedback` observability convention.

/// Suffix actuators append to a command topic when reporting `OK`/`ERROR`
pub const FEEDBACK_SUFFIX: &str = "/feedback";

/// Retained presence payload announced on every (re)connect
pub const PRESENCE_ONLINE: &str = "online";

/// Retained last-will payload the broker publishes on unclean death
pub const PRESENCE_OFFLINE: &str = "offline";

/// Status topic for a device or controller: `devices/<name>/status`
pub fn device_status_topic(name: &str) -> String {
    format!("devices/{name}/status")
}

/// Retained engine status snapshot topic: `devices/<name>/engine`
pub fn engine_status_topic(name: &str) -> String {
    format!("devices/{name}/engine")
}

/// Check whether a topic is a feedback topic
pub fn is_feedback_topic(topic: &str) -> bool {
    topic.ends_with(FEEDBACK_SUFFIX)
}

/// Derive the original command topic from a feedback topic
pub fn feedback_origin(topic: &str) -> Option<&str> {
    topic.strip_suffix(FEEDBACK_SUFFIX)
}

/// Room-scoped topics for control and scene events
#[derive(Debug, Clone)]
pub struct RoomTopics {
    room_id: String,
}

impl RoomTopics {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
        }
    }

    /// Subscription patterns the controller needs for one room
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            "devices/+/status".to_string(),
            format!("{}/+/feedback", self.room_id),
            format!("{}/#", self.room_id),
        ]
    }

    /// Topic that triggers the default scene (`START` payload)
    pub fn scene_topic(&self) -> String {
        format!("{}/scene", self.room_id)
    }

    /// Topic that triggers a named scene (`<name>.json` payload)
    pub fn named_scene_topic(&self) -> String {
        format!("{}/start_scene", self.room_id)
    }

    /// Topic carrying opaque button identifiers from network panels
    pub fn button_topic(&self) -> String {
        format!("{}/button", self.room_id)
    }

    /// Topic that stops the running scene
    pub fn stop_topic(&self) -> String {
        format!("{}/stop", self.room_id)
    }
}
