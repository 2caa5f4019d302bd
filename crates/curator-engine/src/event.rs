//! Engine event channel
//!
//! Every stimulus the executor reacts to (inbound messages, button presses,
//! media completion, timer fires, control commands) arrives as an
//! [`EngineEvent`] on one channel with one consumer. Producers only enqueue;
//! all state mutation happens on the executor's side of the channel.

use curator_scene::Scene;
use tokio::sync::mpsc;
use tracing::warn;

/// Capacity of the engine event queue
const EVENT_QUEUE_CAPACITY: usize = 256;

/// A stimulus or command for the executor loop
#[derive(Debug)]
pub enum EngineEvent {
    /// Inbound pub/sub message on a subscribed topic
    Message { topic: String, payload: String },

    /// A button press, identified opaquely
    Button { id: String },

    /// The audio collaborator finished playing a file
    AudioFinished { file: String },

    /// The video collaborator finished playing a file
    VideoFinished { file: String },

    /// An armed timer fired
    Timer(TimerFired),

    /// An action failed to take effect; recorded on the status surface
    DispatchFailed { detail: String },

    /// Control command
    Command(EngineCommand),
}

/// Commands routed through the same channel as stimuli
#[derive(Debug)]
pub enum EngineCommand {
    /// Swap in a validated scene and start it from its initial state
    Run(Box<Scene>),
    /// Stop the running scene, leaving the engine idle
    Stop,
}

/// A timer armed by the executor has come due
///
/// `epoch` is the state activation (or scene run, for global timers) the
/// timer was armed under; the executor discards fires from stale epochs so
/// a cancelled timer can never act on the wrong state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub epoch: u64,
    pub kind: TimerKind,
}

/// What an armed timer was scheduled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Timeline entry `index` of the active state came due
    Timeline { index: usize },
    /// Timeout transition `index` of the active state came due
    Timeout { index: usize },
    /// Scene-level timeout event `index` came due
    GlobalTimeout { index: usize },
}

/// Create the engine event channel
pub fn engine_channel() -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    (EngineHandle { tx }, rx)
}

/// Cloneable producer handle for the engine event channel
///
/// Stimulus methods never block: if the queue is full the event is dropped
/// with a warning, which keeps slow consumers from backing up into network
/// callbacks or timer tasks.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    /// Deliver an inbound pub/sub message
    pub fn message(&self, topic: impl Into<String>, payload: impl Into<String>) {
        self.enqueue(EngineEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Deliver a button press
    pub fn button(&self, id: impl Into<String>) {
        self.enqueue(EngineEvent::Button { id: id.into() });
    }

    /// Report that an audio file finished playing
    pub fn audio_finished(&self, file: impl Into<String>) {
        self.enqueue(EngineEvent::AudioFinished { file: file.into() });
    }

    /// Report that a video file finished playing
    pub fn video_finished(&self, file: impl Into<String>) {
        self.enqueue(EngineEvent::VideoFinished { file: file.into() });
    }

    /// Report a failed action dispatch
    pub fn dispatch_failed(&self, detail: impl Into<String>) {
        self.enqueue(EngineEvent::DispatchFailed {
            detail: detail.into(),
        });
    }

    pub(crate) fn timer(&self, fired: TimerFired) {
        self.enqueue(EngineEvent::Timer(fired));
    }

    /// Swap in a validated scene and start it
    pub async fn run_scene(&self, scene: Scene) {
        let _ = self
            .tx
            .send(EngineEvent::Command(EngineCommand::Run(Box::new(scene))))
            .await;
    }

    /// Stop the running scene
    pub async fn stop_scene(&self) {
        let _ = self.tx.send(EngineEvent::Command(EngineCommand::Stop)).await;
    }

    fn enqueue(&self, event: EngineEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            warn!(?event, "Engine event queue full, dropping event");
        }
    }
}
