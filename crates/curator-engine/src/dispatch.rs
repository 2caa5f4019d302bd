//! Action dispatcher
//!
//! Translates declarative actions into effects: a pub/sub publish or a
//! command handed to a playback collaborator. Jobs run on a dedicated task
//! in enqueue order, so entry, timeline, and exit effects of consecutive
//! states reach the hardware in the order the executor decided them, while
//! the executor itself never waits on an actuator.
//!
//! Every failure here is non-fatal: a missing or offline actuator is logged
//! and reported on the status surface, and the show goes on.

use std::sync::Arc;

use curator_scene::Action;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::event::EngineHandle;

/// Capacity of the dispatch job queue
const JOB_QUEUE_CAPACITY: usize = 256;

/// Collaborator error type at the dispatcher boundary
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound publish seam, implemented by the messaging client wiring
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), CollaboratorError>;
}

/// Playback collaborator seam for audio and video
///
/// The command string's grammar (`PLAY:<file>:<volume>`, `STOP`, `PAUSE`,
/// `SEEK:<seconds>`, …) is owned by the collaborator, never parsed here.
pub trait MediaPlayer: Send + Sync {
    fn handle_command(&self, command: &str) -> Result<(), CollaboratorError>;
}

/// A dispatch failure; logged with full context, never propagated as fatal
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("audio command '{command}' failed: {reason}")]
    Audio { command: String, reason: String },

    #[error("video command '{command}' failed: {reason}")]
    Video { command: String, reason: String },

    #[error("no {collaborator} collaborator attached, command '{command}' skipped")]
    NoCollaborator {
        collaborator: &'static str,
        command: String,
    },
}

/// Where in a state an action was declared; carried for log context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    OnEnter,
    OnExit,
    Timeline,
}

impl std::fmt::Display for ActionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionSource::OnEnter => write!(f, "onEnter"),
            ActionSource::OnExit => write!(f, "onExit"),
            ActionSource::Timeline => write!(f, "timeline"),
        }
    }
}

struct DispatchJob {
    scene_id: Arc<str>,
    state: Arc<str>,
    source: ActionSource,
    index: usize,
    action: Action,
}

/// Handle to the dispatch task
#[derive(Clone)]
pub struct Dispatcher {
    jobs: mpsc::Sender<DispatchJob>,
}

impl Dispatcher {
    /// Spawn the dispatch task
    ///
    /// `audio`/`video` may be absent (headless installations); their
    /// commands are then logged and skipped. Failures are reported back to
    /// the executor through `reporter` so they land on the status surface.
    pub fn spawn(
        publisher: Arc<dyn MessagePublisher>,
        audio: Option<Arc<dyn MediaPlayer>>,
        video: Option<Arc<dyn MediaPlayer>>,
        reporter: EngineHandle,
    ) -> Dispatcher {
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<DispatchJob>(JOB_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                if let Err(e) = execute(&publisher, audio.as_deref(), video.as_deref(), &job) {
                    error!(
                        scene_id = %job.scene_id,
                        state = %job.state,
                        source = %job.source,
                        index = job.index,
                        error = %e,
                        "Action dispatch failed, continuing"
                    );
                    reporter.dispatch_failed(e.to_string());
                }
            }
        });

        Dispatcher { jobs: jobs_tx }
    }

    /// Enqueue one action for dispatch; never blocks the executor
    pub fn enqueue(
        &self,
        scene_id: &Arc<str>,
        state: &Arc<str>,
        source: ActionSource,
        index: usize,
        action: &Action,
    ) {
        let job = DispatchJob {
            scene_id: scene_id.clone(),
            state: state.clone(),
            source,
            index,
            action: action.clone(),
        };
        if self.jobs.try_send(job).is_err() {
            warn!(
                state = %state,
                source = %source,
                index = index,
                "Dispatch queue full, action dropped"
            );
        }
    }
}

fn execute(
    publisher: &Arc<dyn MessagePublisher>,
    audio: Option<&dyn MediaPlayer>,
    video: Option<&dyn MediaPlayer>,
    job: &DispatchJob,
) -> Result<(), DispatchError> {
    match &job.action {
        Action::Mqtt {
            topic,
            message,
            retain,
        } => {
            publisher
                .publish(topic, message, *retain)
                .map_err(|e| DispatchError::Publish {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;
            debug!(topic = %topic, payload = %message, "Published command");
            Ok(())
        }
        Action::Audio { message } => match audio {
            Some(player) => player
                .handle_command(message)
                .map_err(|e| DispatchError::Audio {
                    command: message.clone(),
                    reason: e.to_string(),
                }),
            None => Err(DispatchError::NoCollaborator {
                collaborator: "audio",
                command: message.clone(),
            }),
        },
        Action::Video { message } => match video {
            Some(player) => player
                .handle_command(message)
                .map_err(|e| DispatchError::Video {
                    command: message.clone(),
                    reason: e.to_string(),
                }),
            None => Err(DispatchError::NoCollaborator {
                collaborator: "video",
                command: message.clone(),
            }),
        },
    }
}
