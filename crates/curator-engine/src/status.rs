//! Status and heartbeat surfaces
//!
//! Read-only observability for the dashboard and the watchdog. The executor
//! is the only writer; observers hold `watch` receivers and never call back
//! into the engine.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

/// Executor lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No scene loaded
    Idle,
    /// Running a state's entry actions
    Entering,
    /// Timers and watchers armed, awaiting a trigger
    Active,
    /// Running a state's exit actions
    Exiting,
    /// Terminal; reached on engine shutdown
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Entering => "entering",
            Phase::Active => "active",
            Phase::Exiting => "exiting",
            Phase::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the engine for the read-only status surface
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub phase: Phase,
    /// Scene currently loaded, if any
    pub scene_id: Option<String>,
    /// Name of the current state
    pub state: Option<String>,
    /// Wall-clock instant the current state was entered
    pub entered_at: Option<DateTime<Utc>>,
    /// Most recent dispatch failure, if any
    pub last_error: Option<String>,
}

impl EngineStatus {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            scene_id: None,
            state: None,
            entered_at: None,
            last_error: None,
        }
    }

    /// Seconds the current state has been active, per this snapshot
    pub fn time_in_state(&self) -> Option<f64> {
        self.entered_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
    }
}

/// Liveness heartbeat updated by the executor on every completed transition
///
/// The watchdog holds the receiving side and restarts the process when the
/// beat goes stale while a scene is running.
#[derive(Clone)]
pub struct Heartbeat {
    tx: watch::Sender<Instant>,
}

impl Heartbeat {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Instant::now());
        Self { tx }
    }

    /// Record a beat
    pub fn beat(&self) {
        self.tx.send_replace(Instant::now());
    }

    /// Receiver for the watchdog
    pub fn watch(&self) -> watch::Receiver<Instant> {
        self.tx.subscribe()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
