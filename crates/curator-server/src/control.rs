//! Inbound message routing
//!
//! Everything the broker delivers for this room funnels through here. Control
//! topics (start the default scene, start a named scene, stop, button) are
//! consumed and turned into engine commands; every other message is forwarded
//! verbatim as a stimulus for the engine's `mqtt` transition triggers.
//!
//! Scene loads route through the validator: a document that fails validation
//! is logged and discarded, and whatever scene is already running keeps
//! running.

use std::time::Duration;

use curator_config::ScenesConfig;
use curator_engine::EngineHandle;
use curator_mqtt::{InboundMessage, RoomTopics};
use curator_scene::Scene;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Payload that starts the room's default scene on the scene topic
const START_PAYLOAD: &str = "START";

/// Routes inbound broker messages to the engine
pub struct ControlRouter {
    room_id: String,
    topics: RoomTopics,
    scenes: ScenesConfig,
    debounce: Duration,
    engine: EngineHandle,
    last_button: Option<Instant>,
}

impl ControlRouter {
    pub fn new(
        room_id: impl Into<String>,
        scenes: ScenesConfig,
        debounce: Duration,
        engine: EngineHandle,
    ) -> Self {
        let room_id = room_id.into();
        Self {
            topics: RoomTopics::new(room_id.as_str()),
            room_id,
            scenes,
            debounce,
            engine,
            last_button: None,
        }
    }

    /// Consume inbound messages until the channel closes
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.route(message).await;
        }
        debug!("Control router stopped");
    }

    async fn route(&mut self, message: InboundMessage) {
        let InboundMessage { topic, payload } = message;

        if topic == self.topics.scene_topic() {
            if payload.eq_ignore_ascii_case(START_PAYLOAD) {
                let path = self.scenes.default_scene_path(&self.room_id);
                self.start_scene_file(&path).await;
            } else {
                warn!(payload = %payload, "Unrecognized scene command ignored");
            }
        } else if topic == self.topics.named_scene_topic() {
            match sanitize_scene_name(&payload) {
                Some(name) => {
                    let path = self.scenes.scene_path(&self.room_id, name);
                    self.start_scene_file(&path).await;
                }
                None => warn!(payload = %payload, "Rejected scene name"),
            }
        } else if topic == self.topics.stop_topic() {
            info!("Stop command received");
            self.engine.stop_scene().await;
        } else if topic == self.topics.button_topic() {
            self.button_press(&payload);
        } else {
            self.engine.message(topic, payload);
        }
    }

    async fn start_scene_file(&self, path: &std::path::Path) {
        match Scene::from_file(path) {
            Ok(scene) => {
                info!(scene_id = %scene.scene_id, path = %path.display(), "Starting scene");
                self.engine.run_scene(scene).await;
            }
            Err(e) => {
                // A running scene keeps running; only the load attempt fails.
                error!(path = %path.display(), error = %e, "Scene load failed");
            }
        }
    }

    fn button_press(&mut self, id: &str) {
        let now = Instant::now();
        if let Some(last) = self.last_button {
            if now.duration_since(last) < self.debounce {
                debug!(button = %id, "Button press debounced");
                return;
            }
        }
        self.last_button = Some(now);
        info!(button = %id, "Button pressed");
        self.engine.button(id);
    }
}

/// Accept bare scene file names only; path separators or traversal in a
/// broker-supplied name must not escape the room's scene directory.
fn sanitize_scene_name(payload: &str) -> Option<&str> {
    let name = payload.trim();
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        None
    } else {
        Some(name)
    }
}
